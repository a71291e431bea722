//! Per-job progress counters and the derived snapshot read by pollers.
//!
//! Only the job controller writes to a [`ProgressTracker`]; any number of
//! readers call [`ProgressTracker::snapshot`] at will.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Point-in-time view of a job's progress. Derived, never authoritative.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub pages_done: u32,
    pub pages_succeeded: u32,
    pub pages_failed: u32,
    pub total_pages: Option<u32>,
    pub records_found: usize,
    pub pages_per_minute: f64,
    pub eta_seconds: Option<u64>,
    pub percent_complete: u8,
    pub current_activity: String,
}

#[derive(Debug)]
struct Counters {
    total_pages: Option<u32>,
    pages_attempted: u32,
    pages_succeeded: u32,
    pages_failed: u32,
    records_found: usize,
    mean_page_secs: Option<f64>,
    activity: String,
    started_at: Option<Instant>,
    frozen_elapsed: Option<Duration>,
}

#[derive(Debug)]
pub struct ProgressTracker {
    counters: Mutex<Counters>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(Counters {
                total_pages: None,
                pages_attempted: 0,
                pages_succeeded: 0,
                pages_failed: 0,
                records_found: 0,
                mean_page_secs: None,
                activity: "queued".to_string(),
                started_at: None,
                frozen_elapsed: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start the clock.
    pub fn start(&self) {
        let mut c = self.lock();
        c.started_at.get_or_insert_with(Instant::now);
    }

    pub fn set_total_pages(&self, total: Option<u32>) {
        self.lock().total_pages = total;
    }

    /// Raise the page total if a source yields more pages than it announced.
    pub fn raise_total_pages(&self, at_least: u32) {
        let mut c = self.lock();
        if let Some(total) = c.total_pages {
            if at_least > total {
                c.total_pages = Some(at_least);
            }
        }
    }

    pub fn set_activity(&self, activity: impl Into<String>) {
        self.lock().activity = activity.into();
    }

    pub fn page_attempted(&self) {
        self.lock().pages_attempted += 1;
    }

    /// Record a successful page and fold its duration into the running mean.
    pub fn page_succeeded(&self, records: usize, duration: Duration) {
        let mut c = self.lock();
        c.pages_succeeded += 1;
        c.records_found += records;
        let secs = duration.as_secs_f64();
        let n = c.pages_succeeded as f64;
        c.mean_page_secs = Some(match c.mean_page_secs {
            Some(mean) => mean + (secs - mean) / n,
            None => secs,
        });
    }

    pub fn page_failed(&self) {
        self.lock().pages_failed += 1;
    }

    /// Freeze elapsed time; snapshots of a finished job stop moving.
    pub fn finish(&self, activity: impl Into<String>) {
        let mut c = self.lock();
        let elapsed = c.started_at.map(|s| s.elapsed()).unwrap_or_default();
        c.frozen_elapsed.get_or_insert(elapsed);
        c.activity = activity.into();
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let c = self.lock();
        let elapsed = c
            .frozen_elapsed
            .or_else(|| c.started_at.map(|s| s.elapsed()))
            .unwrap_or_default();
        snapshot_at(&c, elapsed)
    }
}

fn snapshot_at(c: &Counters, elapsed: Duration) -> ProgressSnapshot {
    let remaining = c
        .total_pages
        .map(|total| total.saturating_sub(c.pages_attempted));

    ProgressSnapshot {
        pages_done: c.pages_attempted,
        pages_succeeded: c.pages_succeeded,
        pages_failed: c.pages_failed,
        total_pages: c.total_pages,
        records_found: c.records_found,
        pages_per_minute: pages_per_minute(c.pages_succeeded, elapsed),
        eta_seconds: eta_seconds(remaining, c.mean_page_secs),
        percent_complete: percent(c.pages_attempted, c.total_pages),
        current_activity: c.activity.clone(),
    }
}

/// Succeeded pages per elapsed minute; zero until a full second has elapsed.
pub fn pages_per_minute(pages_succeeded: u32, elapsed: Duration) -> f64 {
    if elapsed < Duration::from_secs(1) {
        return 0.0;
    }
    let rate = pages_succeeded as f64 / (elapsed.as_secs_f64() / 60.0);
    (rate * 100.0).round() / 100.0
}

/// Remaining pages times the mean page duration, when both are known.
pub fn eta_seconds(remaining_pages: Option<u32>, mean_page_secs: Option<f64>) -> Option<u64> {
    let remaining = remaining_pages?;
    let mean = mean_page_secs?;
    Some((remaining as f64 * mean).round() as u64)
}

fn percent(done: u32, total: Option<u32>) -> u8 {
    match total {
        Some(total) if total > 0 => ((done.min(total) as u64 * 100) / total as u64) as u8,
        _ => 0,
    }
}
