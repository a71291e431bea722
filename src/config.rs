//! Service settings, read from the environment (and `.env`) at startup.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::openrouter::DEFAULT_MODEL;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub bind_addr: String,
    /// Per-job scratch space and page archives live under here.
    pub work_dir: PathBuf,
    pub pdf_dpi: u32,
    /// Longest side of a page image sent for recognition, in pixels.
    pub max_image_size: u32,
    pub max_upload_mb: usize,
    pub vision_model: String,
    pub max_retries: u32,
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            work_dir: PathBuf::from("./work"),
            pdf_dpi: 200,
            max_image_size: 2048,
            max_upload_mb: 100,
            vision_model: DEFAULT_MODEL.to_string(),
            max_retries: 3,
            request_timeout_secs: 120,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let settings = Self::from_lookup(|key| std::env::var(key).ok())?;
        info!(
            "Settings: bind={} work_dir={:?} dpi={} max_image={} model={}",
            settings.bind_addr,
            settings.work_dir,
            settings.pdf_dpi,
            settings.max_image_size,
            settings.vision_model
        );
        Ok(settings)
    }

    /// Build settings from any key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            bind_addr: lookup("BIND_ADDR").unwrap_or(defaults.bind_addr),
            work_dir: lookup("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            pdf_dpi: parse_var(&lookup, "PDF_DPI", defaults.pdf_dpi)?,
            max_image_size: parse_var(&lookup, "MAX_IMAGE_SIZE", defaults.max_image_size)?,
            max_upload_mb: parse_var(&lookup, "MAX_UPLOAD_MB", defaults.max_upload_mb)?,
            vision_model: lookup("VISION_MODEL").unwrap_or(defaults.vision_model),
            max_retries: parse_var(&lookup, "RECOGNITION_MAX_RETRIES", defaults.max_retries)?,
            request_timeout_secs: parse_var(
                &lookup,
                "REQUEST_TIMEOUT_SECS",
                defaults.request_timeout_secs,
            )?,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}
