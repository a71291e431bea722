//! Extracted label records.
//!
//! A [`Record`] has a fixed schema: six editable label fields plus the page it
//! came from and an optional pixel region on that page. [`RawRecord`] is the
//! loosely-typed candidate returned by the recognizer before it is attached to
//! a page.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Bounding box in page-pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// One recognized label on one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub equipment_type: String,
    pub device_tag: String,
    pub fed_from: Option<String>,
    pub primary_from: Option<String>,
    pub specs: Option<String>,
    pub is_spare: bool,
    pub source_page: u32,
    pub region: Option<Region>,
}

impl Record {
    pub fn has_region(&self) -> bool {
        self.region.is_some()
    }

    /// Set one editable field. The record is left untouched on error.
    pub fn set(&mut self, field: RecordField, value: FieldValue) -> Result<()> {
        match field {
            RecordField::EquipmentType => self.equipment_type = value.into_required_text(field)?,
            RecordField::DeviceTag => self.device_tag = value.into_required_text(field)?,
            RecordField::FedFrom => self.fed_from = value.into_optional_text(field)?,
            RecordField::PrimaryFrom => self.primary_from = value.into_optional_text(field)?,
            RecordField::Specs => self.specs = value.into_optional_text(field)?,
            RecordField::IsSpare => self.is_spare = value.into_bool(field)?,
        }
        Ok(())
    }
}

/// The closed set of fields an editor may change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordField {
    EquipmentType,
    DeviceTag,
    FedFrom,
    PrimaryFrom,
    Specs,
    IsSpare,
}

impl RecordField {
    pub const ALL: [RecordField; 6] = [
        RecordField::EquipmentType,
        RecordField::DeviceTag,
        RecordField::FedFrom,
        RecordField::PrimaryFrom,
        RecordField::Specs,
        RecordField::IsSpare,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordField::EquipmentType => "equipment_type",
            RecordField::DeviceTag => "device_tag",
            RecordField::FedFrom => "fed_from",
            RecordField::PrimaryFrom => "primary_from",
            RecordField::Specs => "specs",
            RecordField::IsSpare => "is_spare",
        }
    }
}

impl fmt::Display for RecordField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        RecordField::ALL
            .into_iter()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| Error::InvalidFieldName(s.to_string()))
    }
}

/// A new value for a record field, as received from an editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Text(String),
    Null,
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl FieldValue {
    fn into_required_text(self, field: RecordField) -> Result<String> {
        match self {
            FieldValue::Text(text) => Ok(text),
            other => Err(invalid(field, format!("expected text, got {:?}", other))),
        }
    }

    fn into_optional_text(self, field: RecordField) -> Result<Option<String>> {
        match self {
            FieldValue::Text(text) if text.trim().is_empty() => Ok(None),
            FieldValue::Text(text) => Ok(Some(text)),
            FieldValue::Null => Ok(None),
            FieldValue::Bool(b) => Err(invalid(field, format!("expected text or null, got {}", b))),
        }
    }

    fn into_bool(self, field: RecordField) -> Result<bool> {
        match self {
            FieldValue::Bool(b) => Ok(b),
            FieldValue::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(true),
                "false" | "no" | "0" => Ok(false),
                _ => Err(invalid(field, format!("expected a boolean, got '{}'", text))),
            },
            FieldValue::Null => Err(invalid(field, "expected a boolean, got null".to_string())),
        }
    }
}

fn invalid(field: RecordField, reason: String) -> Error {
    Error::InvalidFieldValue {
        field: field.as_str().to_string(),
        reason,
    }
}

/// A label candidate exactly as the recognizer reported it.
///
/// Bounding box components are percentages (0-100) of the page dimensions.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawRecord {
    #[serde(default)]
    pub equipment_type: Option<String>,
    #[serde(default)]
    pub device_tag: Option<String>,
    #[serde(default)]
    pub fed_from: Option<String>,
    #[serde(default)]
    pub primary_from: Option<String>,
    #[serde(default)]
    pub specs: Option<String>,
    #[serde(default)]
    pub is_spare: bool,
    #[serde(default)]
    pub bbox_x: Option<f64>,
    #[serde(default)]
    pub bbox_y: Option<f64>,
    #[serde(default)]
    pub bbox_width: Option<f64>,
    #[serde(default)]
    pub bbox_height: Option<f64>,
}

impl RawRecord {
    /// Attach the candidate to a page of the given pixel size.
    pub fn into_record(self, source_page: u32, page_width: u32, page_height: u32) -> Record {
        let region = self.region(page_width, page_height);
        Record {
            equipment_type: non_empty(self.equipment_type).unwrap_or_else(|| "UNKNOWN".to_string()),
            device_tag: self.device_tag.map(|t| t.trim().to_string()).unwrap_or_default(),
            fed_from: non_empty(self.fed_from),
            primary_from: non_empty(self.primary_from),
            specs: non_empty(self.specs),
            is_spare: self.is_spare,
            source_page,
            region,
        }
    }

    /// Convert the percentage box into a pixel region clamped to the page.
    fn region(&self, page_width: u32, page_height: u32) -> Option<Region> {
        let (x, y, w, h) = (self.bbox_x?, self.bbox_y?, self.bbox_width?, self.bbox_height?);
        if ![x, y, w, h].iter().all(|v| v.is_finite()) {
            return None;
        }

        let to_px = |pct: f64, extent: u32| -> u32 {
            ((pct.clamp(0.0, 100.0) / 100.0) * extent as f64).round() as u32
        };

        let x1 = to_px(x, page_width);
        let y1 = to_px(y, page_height);
        let x2 = to_px(x + w, page_width);
        let y2 = to_px(y + h, page_height);

        if x2 <= x1 || y2 <= y1 {
            return None;
        }

        Some(Region {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("null"))
}

#[cfg(test)]
pub(crate) fn sample_record(device_tag: &str, source_page: u32) -> Record {
    Record {
        equipment_type: "MSB".to_string(),
        device_tag: device_tag.to_string(),
        fed_from: Some("TRNAA110".to_string()),
        primary_from: None,
        specs: Some("4000A 480Y/277V".to_string()),
        is_spare: false,
        source_page,
        region: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_names_parse() {
        assert_eq!("device_tag".parse::<RecordField>().unwrap(), RecordField::DeviceTag);
        assert_eq!("is_spare".parse::<RecordField>().unwrap(), RecordField::IsSpare);

        let err = "alternate_from".parse::<RecordField>().unwrap_err();
        assert!(matches!(err, Error::InvalidFieldName(name) if name == "alternate_from"));
    }

    #[test]
    fn test_set_fields() {
        let mut record = sample_record("EDC ATL11 MSBAA110", 1);

        record.set(RecordField::DeviceTag, "MSBAA111".into()).unwrap();
        record.set(RecordField::FedFrom, FieldValue::Null).unwrap();
        record.set(RecordField::Specs, "".into()).unwrap();
        record.set(RecordField::IsSpare, "true".into()).unwrap();

        assert_eq!(record.device_tag, "MSBAA111");
        assert_eq!(record.fed_from, None);
        assert_eq!(record.specs, None);
        assert!(record.is_spare);
    }

    #[test]
    fn test_set_rejects_wrong_type() {
        let mut record = sample_record("EDC ATL11 MSBAA110", 1);
        let before = record.clone();

        assert!(matches!(
            record.set(RecordField::IsSpare, "maybe".into()),
            Err(Error::InvalidFieldValue { .. })
        ));
        assert!(matches!(
            record.set(RecordField::DeviceTag, FieldValue::Null),
            Err(Error::InvalidFieldValue { .. })
        ));
        assert_eq!(record, before);
    }

    #[test]
    fn test_field_value_deserializes_untagged() {
        let v: FieldValue = serde_json::from_str("true").unwrap();
        assert_eq!(v, FieldValue::Bool(true));
        let v: FieldValue = serde_json::from_str("\"GSBAA110\"").unwrap();
        assert_eq!(v, FieldValue::Text("GSBAA110".to_string()));
        let v: FieldValue = serde_json::from_str("null").unwrap();
        assert_eq!(v, FieldValue::Null);
    }

    #[test]
    fn test_raw_record_region_in_pixels() {
        let raw = RawRecord {
            equipment_type: Some("MDP".to_string()),
            device_tag: Some(" EDC ATL11 MDPAA110 ".to_string()),
            fed_from: Some("MSBAA110".to_string()),
            primary_from: Some("null".to_string()),
            bbox_x: Some(25.0),
            bbox_y: Some(10.0),
            bbox_width: Some(10.0),
            bbox_height: Some(5.0),
            ..Default::default()
        };

        let record = raw.into_record(3, 2000, 1000);
        assert_eq!(record.device_tag, "EDC ATL11 MDPAA110");
        assert_eq!(record.primary_from, None);
        assert_eq!(record.source_page, 3);
        assert_eq!(
            record.region,
            Some(Region { x: 500, y: 100, width: 200, height: 50 })
        );
        assert!(record.has_region());
    }

    #[test]
    fn test_raw_record_partial_bbox_has_no_region() {
        let raw = RawRecord {
            bbox_x: Some(25.0),
            bbox_y: Some(10.0),
            bbox_width: Some(10.0),
            ..Default::default()
        };

        let record = raw.into_record(1, 100, 100);
        assert_eq!(record.equipment_type, "UNKNOWN");
        assert_eq!(record.device_tag, "");
        assert!(!record.has_region());
    }

    #[test]
    fn test_raw_record_box_clamped_to_page() {
        let raw = RawRecord {
            bbox_x: Some(95.0),
            bbox_y: Some(-5.0),
            bbox_width: Some(20.0),
            bbox_height: Some(15.0),
            ..Default::default()
        };

        let region = raw.into_record(1, 1000, 1000).region.unwrap();
        assert_eq!(region, Region { x: 950, y: 0, width: 50, height: 100 });
    }
}
