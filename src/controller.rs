//! Job controller: owns one job's lifecycle and drives its page loop.
//!
//! ```text
//! Queued --start()--> Processing
//! Processing --source exhausted--> Completed
//! Processing --cancel flag seen between pages or at the end--> Cancelled
//! Processing --unreadable input / fatal recognition error--> Failed
//! ```
//!
//! The run loop is the only writer of job status and progress. The record
//! store is shared with editors and is locked only around each append, never
//! across rendering or recognition.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::page_archive::PageArchive;
use crate::page_source::{DocumentInput, PageImage, Rasterizer};
use crate::progress::{ProgressSnapshot, ProgressTracker};
use crate::recognition::RecognitionAdapter;
use crate::record_store::RecordStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Processing,
    Completed,
    Cancelled,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Cancelled | JobState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Cancelled => "cancelled",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable facts about a submitted job.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: Uuid,
    pub filename: String,
    pub input_digest: String,
    pub submitted_at: DateTime<Utc>,
}

/// Mutable lifecycle fields, written only by the controller.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub state: JobState,
    pub total_pages: Option<u32>,
    pub current_page: u32,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Everything a poller needs in one read.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    #[serde(flatten)]
    pub info: JobInfo,
    #[serde(flatten)]
    pub status: JobStatus,
    pub progress: ProgressSnapshot,
}

pub struct JobController {
    info: JobInfo,
    status: RwLock<JobStatus>,
    progress: ProgressTracker,
    records: RecordStore,
    cancel_requested: AtomicBool,
    input: Mutex<Option<DocumentInput>>,
    job_dir: PathBuf,
    archive: Option<PageArchive>,
}

impl JobController {
    /// Create a queued job whose scratch files live under `work_dir/<id>`.
    pub fn new(input: DocumentInput, work_dir: &Path) -> Self {
        let id = Uuid::new_v4();
        let input_digest = {
            let mut hasher = Sha256::new();
            hasher.update(&input.data);
            format!("{:x}", hasher.finalize())
        };
        let job_dir = work_dir.join(id.to_string());

        Self {
            info: JobInfo {
                id,
                filename: input.filename.clone(),
                input_digest,
                submitted_at: Utc::now(),
            },
            status: RwLock::new(JobStatus {
                state: JobState::Queued,
                total_pages: None,
                current_page: 0,
                error: None,
                started_at: None,
                finished_at: None,
            }),
            progress: ProgressTracker::new(),
            records: RecordStore::new(),
            cancel_requested: AtomicBool::new(false),
            input: Mutex::new(Some(input)),
            archive: Some(PageArchive::new(job_dir.join("pages"))),
            job_dir,
        }
    }

    /// Do not keep rendered pages on disk.
    pub fn without_page_archive(mut self) -> Self {
        self.archive = None;
        self
    }

    pub fn id(&self) -> Uuid {
        self.info.id
    }

    pub fn info(&self) -> &JobInfo {
        &self.info
    }

    pub fn job_dir(&self) -> &Path {
        &self.job_dir
    }

    pub fn page_archive(&self) -> Option<&PageArchive> {
        self.archive.as_ref()
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn state(&self) -> JobState {
        self.read_status().state
    }

    pub fn status(&self) -> JobStatus {
        self.read_status().clone()
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    pub fn view(&self) -> JobView {
        let status = self.status();
        let mut progress = self.progress();
        if status.state == JobState::Completed {
            progress.percent_complete = 100;
        }
        JobView {
            info: self.info.clone(),
            status,
            progress,
        }
    }

    fn read_status(&self) -> std::sync::RwLockReadGuard<'_, JobStatus> {
        self.status.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_status(&self) -> std::sync::RwLockWriteGuard<'_, JobStatus> {
        self.status.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Move to `Processing` and run the page loop on its own task.
    ///
    /// Returns as soon as the task is spawned. Only valid from `Queued`.
    pub fn start(
        self: &Arc<Self>,
        rasterizer: Arc<dyn Rasterizer>,
        recognizer: Arc<dyn RecognitionAdapter>,
    ) -> Result<JoinHandle<()>> {
        let input = self.begin()?;
        let controller = Arc::clone(self);
        let span = info_span!("job", id = %self.info.id);

        Ok(tokio::spawn(
            async move {
                controller
                    .run(input, rasterizer.as_ref(), recognizer.as_ref())
                    .await
            }
            .instrument(span),
        ))
    }

    fn begin(&self) -> Result<DocumentInput> {
        let mut status = self.write_status();
        if status.state != JobState::Queued {
            return Err(Error::InvalidTransition {
                from: status.state,
                action: "start",
            });
        }

        let input = self
            .input
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(Error::InvalidTransition {
                from: status.state,
                action: "start",
            })?;

        status.state = JobState::Processing;
        status.started_at = Some(Utc::now());
        self.progress.start();
        info!("Job {} started ({})", self.info.id, self.info.filename);
        Ok(input)
    }

    /// Ask the job to stop at the next page boundary.
    ///
    /// Idempotent. Outside `Processing` this is a no-op. Returns the state the
    /// job is in when the request is handled.
    pub fn cancel(&self) -> JobState {
        let status = self.read_status();
        if status.state == JobState::Processing
            && !self.cancel_requested.swap(true, Ordering::SeqCst)
        {
            info!(
                "Cancel requested for job {} at page {}",
                self.info.id, status.current_page
            );
        }
        status.state
    }

    fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    async fn run(
        &self,
        input: DocumentInput,
        rasterizer: &dyn Rasterizer,
        recognizer: &dyn RecognitionAdapter,
    ) {
        self.progress.set_activity("opening document");
        let mut source = match rasterizer.open(&input, &self.job_dir).await {
            Ok(source) => source,
            Err(e) => {
                let e = if matches!(e, Error::InputUnreadable(_)) {
                    e
                } else {
                    Error::input_unreadable(e.to_string())
                };
                error!("Job {} could not open {}: {}", self.info.id, input.filename, e);
                self.fail(e.to_string());
                return;
            }
        };
        drop(input);

        let total = source.total_pages();
        self.write_status().total_pages = total;
        self.progress.set_total_pages(total);
        info!(
            "Job {} opened with {} pages using {}",
            self.info.id,
            total.map(|t| t.to_string()).unwrap_or_else(|| "unknown".to_string()),
            recognizer.name()
        );

        let mut page_number = 0u32;
        loop {
            if self.is_cancel_requested() {
                info!("Job {} cancelled after page {}", self.info.id, page_number);
                self.finish(JobState::Cancelled, self.cancelled_activity(page_number));
                return;
            }

            let next = page_number + 1;
            self.progress
                .set_activity(format!("rendering page {}{}", next, self.of_total()));
            let page_started = Instant::now();

            let Some(rendered) = source.next_page().await else {
                break;
            };
            page_number = next;
            self.begin_page(page_number);

            let page = match rendered {
                Ok(page) => PageImage { page_number, ..page },
                Err(e) => {
                    warn!("Job {} skipping page {}: {}", self.info.id, page_number, e);
                    self.progress.page_failed();
                    continue;
                }
            };

            if let Some(archive) = &self.archive {
                if let Err(e) = archive.save(&page).await {
                    warn!("Job {} could not archive page {}: {}", self.info.id, page_number, e);
                }
            }

            self.progress
                .set_activity(format!("recognizing page {}{}", page_number, self.of_total()));

            match recognizer.recognize(&page).await {
                Ok(candidates) => {
                    let count = candidates.len();
                    for raw in candidates {
                        self.records
                            .append(raw.into_record(page_number, page.width, page.height));
                    }
                    self.progress.page_succeeded(count, page_started.elapsed());
                    self.progress
                        .set_activity(format!("found {} labels on page {}", count, page_number));
                    debug!("Job {} page {}: {} labels", self.info.id, page_number, count);
                }
                Err(e) if e.is_fatal_for_job() => {
                    error!("Job {} failed on page {}: {}", self.info.id, page_number, e);
                    self.fail(e.to_string());
                    return;
                }
                Err(e) => {
                    warn!("Job {} page {} skipped: {}", self.info.id, page_number, e);
                    self.progress.page_failed();
                }
            }
        }

        self.progress.set_activity("finalizing");
        let activity = format!(
            "complete - extracted {} labels from {} pages",
            self.records.len(),
            page_number
        );
        self.finish(JobState::Completed, activity);
        info!(
            "Job {} {}: {} labels from {} pages",
            self.info.id,
            self.state(),
            self.records.len(),
            page_number
        );
    }

    fn of_total(&self) -> String {
        match self.read_status().total_pages {
            Some(total) => format!(" of {}", total),
            None => String::new(),
        }
    }

    fn begin_page(&self, page_number: u32) {
        {
            let mut status = self.write_status();
            status.current_page = page_number;
            if let Some(total) = status.total_pages {
                if page_number > total {
                    status.total_pages = Some(page_number);
                }
            }
        }
        self.progress.raise_total_pages(page_number);
        self.progress.page_attempted();
    }

    fn cancelled_activity(&self, pages: u32) -> String {
        format!(
            "cancelled - partial results available ({} labels from {} pages)",
            self.records.len(),
            pages
        )
    }

    fn fail(&self, message: String) {
        let activity = format!("failed: {}", message);
        self.write_status().error = Some(message);
        self.finish(JobState::Failed, activity);
    }

    /// Enter a terminal state. A job that is already terminal is left alone.
    ///
    /// A cancel accepted while processing turns a completed run into
    /// `Cancelled`. `cancel()` sets the flag under the status read lock, so
    /// checking it here under the write lock cannot miss an accepted request.
    fn finish(&self, state: JobState, activity: String) {
        let mut status = self.write_status();
        if status.state.is_terminal() {
            return;
        }
        let (state, activity) = if state == JobState::Completed && self.is_cancel_requested() {
            (JobState::Cancelled, self.cancelled_activity(status.current_page))
        } else {
            (state, activity)
        };
        self.progress.finish(activity);
        status.state = state;
        status.finished_at = Some(Utc::now());
    }
}
