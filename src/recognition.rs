//! Recognition adapters: turn one page image into label candidates.
//!
//! Defines the [`RecognitionAdapter`] trait the job controller depends on and
//! [`VisionRecognizer`], which asks a vision LLM through OpenRouter.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::openrouter::{Message, OpenRouterClient};
use crate::page_source::PageImage;
use crate::record::RawRecord;

/// Async trait implemented by each recognition backend.
///
/// Failures must be either [`Error::PageRecognitionRecoverable`] (this page is
/// skipped) or [`Error::PageRecognitionFatal`] (the job stops).
#[async_trait]
pub trait RecognitionAdapter: Send + Sync {
    fn name(&self) -> &str;
    async fn recognize(&self, page: &PageImage) -> Result<Vec<RawRecord>>;
}

const EXTRACTION_PROMPT: &str = r#"You are an expert electrical engineer analyzing one-line electrical diagrams.

Identify and extract every equipment label in this drawing.

EQUIPMENT THAT NEEDS BREAKER LABELS:
MSB, GSB, MVS, DSG, GENAH, GENBH, MDP, UDP, MBC, PDU, EPP variants (EPPAZ, EPPBZ, EPPCZ), HUM (label on the disconnect switch), CONDENSER.

EQUIPMENT THAT DOES NOT NEED BREAKER LABELS:
TRN (unless breakers are shown), UPS, UPB, ATS, RPP, ELP.

CONNECTIONS:
- Single feed: put the source equipment name in "fed_from" (e.g. "MSBAA110"), leave "primary_from" null.
- Dual feed: put the primary source in "primary_from", leave "fed_from" null.
- Use only the equipment name, never the words "FED FROM" or "PRIMARY FROM".
- Never set both "fed_from" and "primary_from".

SPECS: only amperage and voltage, e.g. "600A 480Y/277V".

SPARES: a breaker labeled SPARE, FUTURE or RESERVED, an empty panel position, or one with no downstream equipment is a spare. Use "equipment_type": "SPARE" and "is_spare": true, keeping the breaker rating in "specs" if shown.

BOUNDING BOXES: for every label give bbox_x, bbox_y (top-left corner) and bbox_width, bbox_height as percentages (0-100) of the image width and height. The box must tightly surround the label text only. If you cannot locate a label precisely, omit the bbox fields.

Return ONLY valid JSON in exactly this shape:
{
  "labels": [
    {
      "equipment_type": "MSB",
      "device_tag": "EDC ATL11 MSBAA110",
      "fed_from": null,
      "primary_from": "TRNAA110",
      "specs": "4000A 480Y/277V",
      "is_spare": false,
      "bbox_x": 25.0,
      "bbox_y": 15.0,
      "bbox_width": 12.0,
      "bbox_height": 8.0
    }
  ]
}"#;

/// Vision LLM recognizer with retry and exponential backoff.
pub struct VisionRecognizer {
    client: OpenRouterClient,
    max_attempts: u32,
    base_backoff: Duration,
}

impl VisionRecognizer {
    pub fn new(client: OpenRouterClient, max_attempts: u32) -> Self {
        Self {
            client,
            max_attempts: max_attempts.max(1),
            base_backoff: Duration::from_secs(1),
        }
    }
}

#[async_trait]
impl RecognitionAdapter for VisionRecognizer {
    fn name(&self) -> &str {
        "openrouter_vision"
    }

    async fn recognize(&self, page: &PageImage) -> Result<Vec<RawRecord>> {
        info!(
            "Analyzing page {} ({}x{}) with {}",
            page.page_number,
            page.width,
            page.height,
            self.client.model()
        );

        let mut attempt = 0;
        let response = loop {
            attempt += 1;
            let messages = vec![
                Message::system(EXTRACTION_PROMPT),
                Message::user_with_images(
                    "Extract all equipment labels from this diagram page.",
                    &[page.png.as_slice()],
                ),
            ];

            match self.client.chat(messages).await {
                Ok(text) => break text,
                Err(e) if e.is_permanent() => {
                    return Err(Error::fatal(e.to_string()));
                }
                Err(e) if attempt < self.max_attempts => {
                    let wait = self.base_backoff * 2u32.pow(attempt - 1);
                    warn!(
                        "Attempt {}/{} failed for page {}: {}. Retrying in {:?}",
                        attempt, self.max_attempts, page.page_number, e, wait
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => {
                    return Err(Error::recoverable(format!(
                        "page {}: all {} attempts failed: {}",
                        page.page_number, self.max_attempts, e
                    )));
                }
            }
        };

        debug!("Raw LLM response length: {} chars", response.len());

        let labels = parse_labels(&response)
            .map_err(|e| Error::recoverable(format!("page {}: {:#}", page.page_number, e)))?;
        info!("Extracted {} labels from page {}", labels.len(), page.page_number);
        Ok(labels)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LabelsResponse {
    Wrapped { labels: Vec<RawRecord> },
    Bare(Vec<RawRecord>),
}

/// Parse the model's reply, tolerating markdown code fences.
fn parse_labels(response: &str) -> anyhow::Result<Vec<RawRecord>> {
    let json_str = if response.contains("```json") {
        response
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .unwrap_or(response)
            .trim()
    } else if response.contains("```") {
        response.split("```").nth(1).unwrap_or(response).trim()
    } else {
        response.trim()
    };

    let parsed: LabelsResponse = serde_json::from_str(json_str).with_context(|| {
        format!(
            "Invalid label JSON: {}",
            json_str.chars().take(200).collect::<String>()
        )
    })?;

    Ok(match parsed {
        LabelsResponse::Wrapped { labels } => labels,
        LabelsResponse::Bare(labels) => labels,
    })
}
