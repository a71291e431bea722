//! Error types for the label extraction service.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::controller::JobState;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The submitted document cannot be opened as a page sequence.
    #[error("Input unreadable: {0}")]
    InputUnreadable(String),

    /// Recognition of a single page failed; the job moves on to the next page.
    #[error("Page recognition failed: {0}")]
    PageRecognitionRecoverable(String),

    /// Recognition failed in a way that makes further pages pointless.
    #[error("Page recognition failed fatally: {0}")]
    PageRecognitionFatal(String),

    /// A single page could not be rasterized.
    #[error("Page render failed: {0}")]
    Render(String),

    #[error("Record not found at position {0}")]
    RecordNotFound(usize),

    #[error("Unknown record field: {0}")]
    InvalidFieldName(String),

    #[error("Invalid value for field '{field}': {reason}")]
    InvalidFieldValue { field: String, reason: String },

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Cannot {action} a job that is {from}")]
    InvalidTransition { from: JobState, action: &'static str },

    #[error("Job is still {0}")]
    JobNotFinished(JobState),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl Error {
    pub fn input_unreadable(message: impl Into<String>) -> Self {
        Self::InputUnreadable(message.into())
    }

    pub fn recoverable(message: impl Into<String>) -> Self {
        Self::PageRecognitionRecoverable(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::PageRecognitionFatal(message.into())
    }

    pub fn render(message: impl Into<String>) -> Self {
        Self::Render(message.into())
    }

    /// Whether this error must stop the whole job rather than a single page.
    pub fn is_fatal_for_job(&self) -> bool {
        matches!(self, Self::PageRecognitionFatal(_) | Self::InputUnreadable(_))
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            Error::InputUnreadable(_) => (StatusCode::UNPROCESSABLE_ENTITY, "input_unreadable"),
            Error::PageRecognitionRecoverable(_) | Error::PageRecognitionFatal(_) => {
                (StatusCode::BAD_GATEWAY, "recognition_error")
            }
            Error::Render(_) => (StatusCode::INTERNAL_SERVER_ERROR, "render_error"),
            Error::RecordNotFound(_) => (StatusCode::NOT_FOUND, "record_not_found"),
            Error::InvalidFieldName(_) => (StatusCode::BAD_REQUEST, "invalid_field_name"),
            Error::InvalidFieldValue { .. } => (StatusCode::BAD_REQUEST, "invalid_field_value"),
            Error::JobNotFound(_) => (StatusCode::NOT_FOUND, "job_not_found"),
            Error::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
            Error::JobNotFinished(_) => (StatusCode::CONFLICT, "job_not_finished"),
            Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
            Error::Image(_) => (StatusCode::INTERNAL_SERVER_ERROR, "image_error"),
            Error::Csv(_) => (StatusCode::INTERNAL_SERVER_ERROR, "csv_error"),
        };

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}
