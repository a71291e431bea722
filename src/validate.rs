//! Completeness and consistency checks over a job's records.
//!
//! Checks never change records; they report issues addressed by position so
//! a reviewer can jump to the record and fix it through the store.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::record::Record;

/// Equipment that is a power source and needs no upstream connection.
const SOURCE_EQUIPMENT: [&str; 3] = ["GENAH", "GENBH", "MVS"];

/// Upstream names that never appear as a device tag on the drawing.
const EXTERNAL_SOURCES: [&str; 3] = ["UTILITY", "GRID", "MAIN"];

const MIN_DEVICE_TAG_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    MissingDeviceTag,
    InvalidDeviceTag,
    ShortDeviceTag,
    MissingSpecs,
    MissingAmperage,
    MissingVoltage,
    MissingConnection,
    UnknownSource,
    SelfFeed,
    MissingEquipmentType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub position: usize,
    pub device_tag: String,
    pub kind: IssueKind,
    pub message: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationSummary {
    pub total: usize,
    pub errors: usize,
    pub warnings: usize,
    pub by_kind: BTreeMap<IssueKind, usize>,
}

impl ValidationSummary {
    pub fn from_issues(issues: &[ValidationIssue]) -> Self {
        let mut summary = Self {
            total: issues.len(),
            ..Default::default()
        };
        for issue in issues {
            match issue.severity {
                Severity::Error => summary.errors += 1,
                Severity::Warning => summary.warnings += 1,
            }
            *summary.by_kind.entry(issue.kind).or_insert(0) += 1;
        }
        summary
    }
}

/// Issues plus their summary, as served to reviewers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub summary: ValidationSummary,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn for_records(records: &[Record]) -> Self {
        let issues = validate_all(records);
        Self {
            summary: ValidationSummary::from_issues(&issues),
            issues,
        }
    }
}

fn pattern(cell: &'static OnceLock<Regex>, re: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(re).expect("static validation pattern"))
}

fn device_tag_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    pattern(&CELL, r"^[A-Z0-9\s\-]+$")
}

fn amperage_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    pattern(&CELL, r"\d+A")
}

fn voltage_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    pattern(&CELL, r"\d+(V|kV)")
}

/// Run every check over every record, in list order.
pub fn validate_all(records: &[Record]) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    for (position, record) in records.iter().enumerate() {
        let mut report = |kind: IssueKind, severity: Severity, message: String| {
            issues.push(ValidationIssue {
                position,
                device_tag: record.device_tag.clone(),
                kind,
                message,
                severity,
            })
        };
        check_device_tag(record, &mut report);
        check_specs(record, &mut report);
        check_connections(record, records, &mut report);

        if record.equipment_type.trim().is_empty() || record.equipment_type == "UNKNOWN" {
            report(
                IssueKind::MissingEquipmentType,
                Severity::Error,
                "Equipment type is missing".to_string(),
            );
        }
    }
    tracing::debug!("Validated {} records: {} issues", records.len(), issues.len());
    issues
}

fn check_device_tag(record: &Record, report: &mut impl FnMut(IssueKind, Severity, String)) {
    let tag = &record.device_tag;
    if tag.trim().is_empty() {
        report(
            IssueKind::MissingDeviceTag,
            Severity::Error,
            "Device tag is missing".to_string(),
        );
        return;
    }
    if !device_tag_pattern().is_match(tag) {
        report(
            IssueKind::InvalidDeviceTag,
            Severity::Warning,
            format!("Device tag contains invalid characters: {}", tag),
        );
    }
    if tag.chars().count() < MIN_DEVICE_TAG_LEN {
        report(
            IssueKind::ShortDeviceTag,
            Severity::Warning,
            format!("Device tag too short: {}", tag),
        );
    }
}

fn check_specs(record: &Record, report: &mut impl FnMut(IssueKind, Severity, String)) {
    if record.is_spare {
        return;
    }
    let Some(specs) = record.specs.as_deref() else {
        report(
            IssueKind::MissingSpecs,
            Severity::Error,
            "Voltage/amperage specifications missing".to_string(),
        );
        return;
    };
    if !amperage_pattern().is_match(specs) {
        report(
            IssueKind::MissingAmperage,
            Severity::Warning,
            format!("Amperage not found in specs: {}", specs),
        );
    }
    if !voltage_pattern().is_match(specs) {
        report(
            IssueKind::MissingVoltage,
            Severity::Warning,
            format!("Voltage not found in specs: {}", specs),
        );
    }
}

fn check_connections(
    record: &Record,
    all: &[Record],
    report: &mut impl FnMut(IssueKind, Severity, String),
) {
    if record.is_spare {
        return;
    }

    let Some(source) = record.fed_from.as_deref().or(record.primary_from.as_deref()) else {
        if !SOURCE_EQUIPMENT.contains(&record.equipment_type.as_str()) {
            report(
                IssueKind::MissingConnection,
                Severity::Warning,
                "No feeder connection specified".to_string(),
            );
        }
        return;
    };

    let external = EXTERNAL_SOURCES
        .iter()
        .any(|s| s.eq_ignore_ascii_case(source));
    if !external && !all.iter().any(|r| r.device_tag.contains(source)) {
        report(
            IssueKind::UnknownSource,
            Severity::Error,
            format!("Source equipment '{}' not found in diagram", source),
        );
    }

    if let Some(fed_from) = record.fed_from.as_deref() {
        if record.device_tag.contains(fed_from) {
            report(
                IssueKind::SelfFeed,
                Severity::Error,
                "Equipment cannot feed itself".to_string(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::sample_record;

    fn kinds(issues: &[ValidationIssue], position: usize) -> Vec<IssueKind> {
        issues
            .iter()
            .filter(|i| i.position == position)
            .map(|i| i.kind)
            .collect()
    }

    fn transformer() -> Record {
        let mut r = sample_record("EDC ATL11 TRNAA110", 1);
        r.equipment_type = "TRN".to_string();
        r.fed_from = Some("UTILITY".to_string());
        r
    }

    #[test]
    fn test_clean_records_have_no_issues() {
        let records = vec![transformer(), sample_record("EDC ATL11 MSBAA110", 1)];
        assert!(validate_all(&records).is_empty());
    }

    #[test]
    fn test_device_tag_checks() {
        let mut lower = sample_record("edc msb", 1);
        lower.fed_from = Some("UTILITY".to_string());
        let mut short = sample_record("MSB", 1);
        short.fed_from = Some("UTILITY".to_string());
        let mut missing = sample_record("", 1);
        missing.fed_from = Some("UTILITY".to_string());

        let issues = validate_all(&[lower, short, missing]);
        assert_eq!(kinds(&issues, 0), vec![IssueKind::InvalidDeviceTag]);
        assert_eq!(kinds(&issues, 1), vec![IssueKind::ShortDeviceTag]);
        assert_eq!(kinds(&issues, 2), vec![IssueKind::MissingDeviceTag]);
        assert_eq!(issues[2].severity, Severity::Error);
    }

    #[test]
    fn test_spec_checks_skip_spares() {
        let mut no_specs = transformer();
        no_specs.specs = None;
        let mut no_volts = transformer();
        no_volts.specs = Some("600A".to_string());
        let mut spare = transformer();
        spare.specs = None;
        spare.is_spare = true;

        let issues = validate_all(&[no_specs, no_volts, spare]);
        assert_eq!(kinds(&issues, 0), vec![IssueKind::MissingSpecs]);
        assert_eq!(kinds(&issues, 1), vec![IssueKind::MissingVoltage]);
        assert!(kinds(&issues, 2).is_empty());
    }

    #[test]
    fn test_connection_checks() {
        let mut generator = transformer();
        generator.equipment_type = "GENAH".to_string();
        generator.fed_from = None;

        let mut orphan = transformer();
        orphan.equipment_type = "MDP".to_string();
        orphan.fed_from = None;

        let mut unknown = transformer();
        unknown.fed_from = Some("MSBZZ999".to_string());

        let mut self_fed = sample_record("EDC ATL11 UPSAA110", 1);
        self_fed.fed_from = Some("UPSAA110".to_string());

        let issues = validate_all(&[generator, orphan, unknown, self_fed]);
        assert!(kinds(&issues, 0).is_empty());
        assert_eq!(kinds(&issues, 1), vec![IssueKind::MissingConnection]);
        assert_eq!(kinds(&issues, 2), vec![IssueKind::UnknownSource]);
        assert_eq!(kinds(&issues, 3), vec![IssueKind::SelfFeed]);
    }

    #[test]
    fn test_missing_equipment_type_and_summary() {
        let mut unknown_type = transformer();
        unknown_type.equipment_type = "UNKNOWN".to_string();
        let mut bad = sample_record("ab", 1);
        bad.fed_from = Some("UTILITY".to_string());

        let report = ValidationReport::for_records(&[unknown_type, bad]);
        assert_eq!(kinds(&report.issues, 0), vec![IssueKind::MissingEquipmentType]);
        assert_eq!(report.summary.total, 3);
        assert_eq!(report.summary.errors, 1);
        assert_eq!(report.summary.warnings, 2);
        assert_eq!(report.summary.by_kind[&IssueKind::ShortDeviceTag], 1);
    }
}
