//! Label Harvester - extracts equipment labels from one-line diagram PDFs.
//!
//! Each upload becomes a background job that renders the document page by
//! page, recognizes labels with a vision model and collects them into an
//! editable record store that reviewers poll, correct and export.

mod config;
mod controller;
mod error;
mod export;
mod openrouter;
mod page_archive;
mod page_source;
mod progress;
mod recognition;
mod record;
mod record_store;
mod registry;
mod stats;
mod validate;

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, patch, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use config::Settings;
use controller::{JobState, JobView};
use error::Error;
use openrouter::OpenRouterClient;
use page_source::{DocumentInput, DocumentRasterizer};
use recognition::VisionRecognizer;
use record::FieldValue;
use record_store::RecordView;
use registry::{JobRegistry, JobSummary};
use stats::LabelStatistics;
use validate::ValidationReport;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    registry: Arc<JobRegistry>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "label_harvester=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;
    tokio::fs::create_dir_all(&settings.work_dir).await?;

    let client = OpenRouterClient::from_env(settings.request_timeout())?
        .with_model(settings.vision_model.clone());
    info!("OpenRouter client initialized (model: {})", client.model());

    let registry = JobRegistry::new(
        Arc::new(DocumentRasterizer::new(settings.pdf_dpi, settings.max_image_size)),
        Arc::new(VisionRecognizer::new(client, settings.max_retries)),
        settings.work_dir.clone(),
    );

    let state = AppState {
        registry: Arc::new(registry),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/jobs", get(list_jobs).post(submit_job))
        .route("/jobs/:id", get(get_job).delete(evict_job))
        .route("/jobs/:id/cancel", post(cancel_job))
        .route("/jobs/:id/records", get(list_records))
        .route(
            "/jobs/:id/records/:position",
            patch(update_record).delete(delete_record),
        )
        .route("/jobs/:id/records/:position/crop", get(record_crop))
        .route("/jobs/:id/pages/:page", get(page_image))
        .route("/jobs/:id/export", get(export_job))
        .route("/jobs/:id/stats", get(job_stats))
        .route("/jobs/:id/validation", get(job_validation))
        .layer(DefaultBodyLimit::max(settings.max_upload_bytes()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    info!("Server listening on http://{}", settings.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

/// Upload a document and start a job for it. Returns immediately.
async fn submit_job(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<JobView>), Response> {
    let mut filename = String::new();
    let mut data = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("Multipart error: {}", e)))?
    {
        if field.name() == Some("file") {
            filename = field.file_name().unwrap_or("document.pdf").to_string();
            data = field
                .bytes()
                .await
                .map_err(|e| bad_request(format!("Failed to read file: {}", e)))?
                .to_vec();
            break;
        }
    }

    if data.is_empty() {
        return Err(bad_request("No file uploaded".to_string()));
    }

    info!("Received file: {} ({} bytes)", filename, data.len());

    let job = state
        .registry
        .submit(DocumentInput { filename, data })
        .map_err(IntoResponse::into_response)?;

    Ok((StatusCode::ACCEPTED, Json(job.view())))
}

async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobSummary>> {
    Json(state.registry.list())
}

/// Current state and progress of a job.
async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobView>, Error> {
    Ok(Json(state.registry.get(id)?.view()))
}

#[derive(Serialize)]
struct CancelResponse {
    id: Uuid,
    state: JobState,
}

/// Request cancellation. Safe to repeat; a no-op unless the job is processing.
async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CancelResponse>, Error> {
    let job = state.registry.get(id)?;
    let state = job.cancel();
    Ok(Json(CancelResponse { id, state }))
}

/// Drop a finished job and its files.
async fn evict_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, Error> {
    let job = state.registry.remove(id)?;
    if let Err(e) = tokio::fs::remove_dir_all(job.job_dir()).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove files for job {}: {}", id, e);
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn list_records(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<RecordView>>, Error> {
    Ok(Json(state.registry.get(id)?.records().list()))
}

#[derive(Deserialize)]
struct UpdateRecord {
    field: String,
    value: FieldValue,
}

/// Correct one field of a record. Works while the job is still running.
async fn update_record(
    State(state): State<AppState>,
    Path((id, position)): Path<(Uuid, usize)>,
    Json(body): Json<UpdateRecord>,
) -> Result<Json<RecordView>, Error> {
    let job = state.registry.get(id)?;
    let updated = job.records().update(position, &body.field, body.value)?;
    Ok(Json(updated))
}

/// Delete a record. Positions after it shift down by one.
async fn delete_record(
    State(state): State<AppState>,
    Path((id, position)): Path<(Uuid, usize)>,
) -> Result<Json<RecordView>, Error> {
    let job = state.registry.get(id)?;
    Ok(Json(job.records().delete(position)?))
}

/// PNG of a rendered page.
async fn page_image(
    State(state): State<AppState>,
    Path((id, page)): Path<(Uuid, u32)>,
) -> Result<Response, Response> {
    let job = state.registry.get(id).map_err(IntoResponse::into_response)?;
    let archive = job
        .page_archive()
        .ok_or_else(|| not_found(format!("Pages are not archived for job {}", id)))?;

    match archive.load(page).await.map_err(IntoResponse::into_response)? {
        Some(png) => Ok(png_response(png)),
        None => Err(not_found(format!("Page {} has not been rendered", page))),
    }
}

/// PNG crop of the page area a record was recognized in.
async fn record_crop(
    State(state): State<AppState>,
    Path((id, position)): Path<(Uuid, usize)>,
) -> Result<Response, Response> {
    let job = state.registry.get(id).map_err(IntoResponse::into_response)?;
    let view = job
        .records()
        .get(position)
        .ok_or_else(|| Error::RecordNotFound(position).into_response())?;
    let region = view
        .record
        .region
        .ok_or_else(|| not_found(format!("Record {} has no region", position)))?;
    let archive = job
        .page_archive()
        .ok_or_else(|| not_found(format!("Pages are not archived for job {}", id)))?;

    match archive
        .crop(view.record.source_page, region)
        .await
        .map_err(IntoResponse::into_response)?
    {
        Some(png) => Ok(png_response(png)),
        None => Err(not_found(format!(
            "Page {} has not been rendered",
            view.record.source_page
        ))),
    }
}

/// CSV download of a finished job's records.
async fn export_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, Error> {
    let job = state.registry.get(id)?;
    let status = job.status();
    let csv = export::to_csv(job.info(), &status, &job.records().snapshot())?;
    let filename = export::export_filename(job.info(), status.state);

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        csv,
    )
        .into_response())
}

async fn job_stats(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<LabelStatistics>, Error> {
    let job = state.registry.get(id)?;
    Ok(Json(LabelStatistics::from_records(&job.records().snapshot())))
}

async fn job_validation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ValidationReport>, Error> {
    let job = state.registry.get(id)?;
    Ok(Json(ValidationReport::for_records(&job.records().snapshot())))
}

// ============================================================================
// Helper functions
// ============================================================================

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, message).into_response()
}

fn not_found(message: String) -> Response {
    (StatusCode::NOT_FOUND, message).into_response()
}

fn png_response(png: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, "image/png")], Body::from(png)).into_response()
}
