//! Registry of every job known to this process, keyed by job id.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::controller::{JobController, JobInfo, JobState};
use crate::error::{Error, Result};
use crate::page_source::{DocumentInput, Rasterizer};
use crate::recognition::RecognitionAdapter;

/// One line of the job listing.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    #[serde(flatten)]
    pub info: JobInfo,
    pub state: JobState,
    pub current_page: u32,
    pub total_pages: Option<u32>,
    pub records: usize,
}

pub struct JobRegistry {
    jobs: RwLock<HashMap<Uuid, Arc<JobController>>>,
    rasterizer: Arc<dyn Rasterizer>,
    recognizer: Arc<dyn RecognitionAdapter>,
    work_dir: PathBuf,
    archive_pages: bool,
}

impl JobRegistry {
    pub fn new(
        rasterizer: Arc<dyn Rasterizer>,
        recognizer: Arc<dyn RecognitionAdapter>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            rasterizer,
            recognizer,
            work_dir: work_dir.into(),
            archive_pages: true,
        }
    }

    /// Skip writing rendered pages to disk for new jobs.
    pub fn without_page_archive(mut self) -> Self {
        self.archive_pages = false;
        self
    }

    /// Register a new job and start it. Returns once the job is running.
    pub fn submit(&self, input: DocumentInput) -> Result<Arc<JobController>> {
        let mut controller = JobController::new(input, &self.work_dir);
        if !self.archive_pages {
            controller = controller.without_page_archive();
        }
        let controller = Arc::new(controller);

        self.jobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(controller.id(), Arc::clone(&controller));

        controller.start(Arc::clone(&self.rasterizer), Arc::clone(&self.recognizer))?;
        info!(
            "Submitted job {} for {}",
            controller.id(),
            controller.info().filename
        );
        Ok(controller)
    }

    pub fn get(&self, id: Uuid) -> Result<Arc<JobController>> {
        self.jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
            .ok_or(Error::JobNotFound(id))
    }

    /// All jobs, oldest submission first.
    pub fn list(&self) -> Vec<JobSummary> {
        let jobs: Vec<Arc<JobController>> = self
            .jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();

        let mut summaries: Vec<JobSummary> = jobs
            .iter()
            .map(|job| {
                let status = job.status();
                JobSummary {
                    info: job.info().clone(),
                    state: status.state,
                    current_page: status.current_page,
                    total_pages: status.total_pages,
                    records: job.records().len(),
                }
            })
            .collect();
        summaries.sort_by_key(|s| s.info.submitted_at);
        summaries
    }

    /// Forget a finished job. Running jobs must be cancelled first.
    pub fn remove(&self, id: Uuid) -> Result<Arc<JobController>> {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        let job = jobs.get(&id).ok_or(Error::JobNotFound(id))?;

        let state = job.state();
        if !state.is_terminal() {
            return Err(Error::JobNotFinished(state));
        }

        let job = jobs.remove(&id).ok_or(Error::JobNotFound(id))?;
        info!("Removed job {}", id);
        Ok(job)
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_source::{PageImage, PageSource};
    use crate::record::RawRecord;
    use async_trait::async_trait;
    use std::path::Path;
    use std::time::Duration;

    struct Pages {
        remaining: u32,
        delay: Duration,
    }

    #[async_trait]
    impl PageSource for Pages {
        fn total_pages(&self) -> Option<u32> {
            Some(self.remaining)
        }

        async fn next_page(&mut self) -> Option<Result<PageImage>> {
            if self.remaining == 0 {
                return None;
            }
            tokio::time::sleep(self.delay).await;
            self.remaining -= 1;
            Some(Ok(PageImage {
                page_number: 1,
                width: 100,
                height: 100,
                png: Vec::new(),
            }))
        }
    }

    struct FixedRasterizer {
        pages: u32,
        delay: Duration,
    }

    #[async_trait]
    impl Rasterizer for FixedRasterizer {
        async fn open(&self, _input: &DocumentInput, _job_dir: &Path) -> Result<Box<dyn PageSource>> {
            Ok(Box::new(Pages {
                remaining: self.pages,
                delay: self.delay,
            }))
        }
    }

    struct OneLabel;

    #[async_trait]
    impl RecognitionAdapter for OneLabel {
        fn name(&self) -> &str {
            "one_label"
        }

        async fn recognize(&self, _page: &PageImage) -> Result<Vec<RawRecord>> {
            Ok(vec![RawRecord {
                device_tag: Some("UPSAA110".to_string()),
                ..Default::default()
            }])
        }
    }

    fn registry(pages: u32, delay: Duration) -> JobRegistry {
        JobRegistry::new(
            Arc::new(FixedRasterizer { pages, delay }),
            Arc::new(OneLabel),
            std::env::temp_dir(),
        )
        .without_page_archive()
    }

    fn input(name: &str) -> DocumentInput {
        DocumentInput {
            filename: name.to_string(),
            data: name.as_bytes().to_vec(),
        }
    }

    async fn wait_until_terminal(job: &JobController) -> JobState {
        for _ in 0..500 {
            let state = job.state();
            if state.is_terminal() {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {} never finished", job.id());
    }

    #[tokio::test]
    async fn test_submit_runs_job_to_completion() {
        let registry = registry(3, Duration::ZERO);

        let job = registry.submit(input("a.pdf")).unwrap();
        assert_eq!(wait_until_terminal(&job).await, JobState::Completed);

        let fetched = registry.get(job.id()).unwrap();
        assert_eq!(fetched.records().len(), 3);
    }

    #[tokio::test]
    async fn test_jobs_are_independent() {
        let registry = registry(50, Duration::from_millis(10));

        let first = registry.submit(input("first.pdf")).unwrap();
        let second = registry.submit(input("second.pdf")).unwrap();

        assert_eq!(first.cancel(), JobState::Processing);
        assert_eq!(wait_until_terminal(&first).await, JobState::Cancelled);
        assert_eq!(second.state(), JobState::Processing);

        second.cancel();
        assert_eq!(wait_until_terminal(&second).await, JobState::Cancelled);
        assert_ne!(first.info().input_digest, second.info().input_digest);
    }

    #[tokio::test]
    async fn test_list_and_lookup() {
        let registry = registry(1, Duration::ZERO);
        let a = registry.submit(input("a.pdf")).unwrap();
        let b = registry.submit(input("b.pdf")).unwrap();
        wait_until_terminal(&a).await;
        wait_until_terminal(&b).await;

        let listed: Vec<Uuid> = registry.list().iter().map(|s| s.info.id).collect();
        assert_eq!(listed.len(), 2);
        assert!(listed.contains(&a.id()) && listed.contains(&b.id()));

        let missing = Uuid::new_v4();
        assert!(matches!(registry.get(missing), Err(Error::JobNotFound(id)) if id == missing));
    }

    #[tokio::test]
    async fn test_remove_requires_terminal_job() {
        let registry = registry(50, Duration::from_millis(10));
        let job = registry.submit(input("long.pdf")).unwrap();

        assert!(matches!(
            registry.remove(job.id()),
            Err(Error::JobNotFinished(JobState::Processing))
        ));

        job.cancel();
        wait_until_terminal(&job).await;
        registry.remove(job.id()).unwrap();
        assert!(registry.is_empty());
        assert!(matches!(registry.remove(job.id()), Err(Error::JobNotFound(_))));
    }
}
