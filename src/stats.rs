//! Summary statistics over a job's records.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::record::Record;

pub const VOLTAGE_CLASSES: [&str; 4] = [
    "Medium Voltage (>600V)",
    "Low Voltage (480V)",
    "Extra Low Voltage (<50V)",
    "Unknown",
];

pub const AMPERAGE_RANGES: [&str; 5] = ["<100A", "100-600A", "600-2000A", ">2000A", "Unknown"];

fn amperage_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\d+)A").expect("static amperage pattern"))
}

fn voltage_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\d+)V").expect("static voltage pattern"))
}

/// First amperage figure in a specs string, e.g. `600` from `"600A 480Y/277V"`.
pub fn amperage(specs: &str) -> Option<u64> {
    amperage_pattern()
        .captures(specs)
        .and_then(|c| c[1].parse().ok())
}

/// A named bucket in a fixed-order breakdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bucket {
    pub label: &'static str,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionSummary {
    pub single_feed: usize,
    pub dual_feed: usize,
    pub no_connection: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelStatistics {
    pub total_labels: usize,
    pub spare_labels: usize,
    pub by_equipment_type: BTreeMap<String, usize>,
    pub total_amperage_by_type: BTreeMap<String, u64>,
    pub by_voltage_class: Vec<Bucket>,
    pub by_amperage_range: Vec<Bucket>,
    pub connections: ConnectionSummary,
}

impl LabelStatistics {
    pub fn from_records(records: &[Record]) -> Self {
        let mut by_equipment_type = BTreeMap::new();
        let mut total_amperage_by_type: BTreeMap<String, u64> = BTreeMap::new();
        let mut voltage = [0usize; VOLTAGE_CLASSES.len()];
        let mut amps = [0usize; AMPERAGE_RANGES.len()];
        let mut connections = ConnectionSummary::default();

        for record in records {
            *by_equipment_type
                .entry(record.equipment_type.clone())
                .or_insert(0) += 1;

            let specs = record.specs.as_deref();
            voltage[voltage_class(specs)] += 1;
            amps[amperage_range(specs)] += 1;

            if let Some(a) = specs.and_then(amperage) {
                let total = total_amperage_by_type
                    .entry(record.equipment_type.clone())
                    .or_insert(0);
                *total = total.saturating_add(a);
            }

            match (&record.fed_from, &record.primary_from) {
                (Some(_), Some(_)) => connections.dual_feed += 1,
                (Some(_), None) | (None, Some(_)) => connections.single_feed += 1,
                (None, None) => connections.no_connection += 1,
            }
        }

        Self {
            total_labels: records.len(),
            spare_labels: records.iter().filter(|r| r.is_spare).count(),
            by_equipment_type,
            total_amperage_by_type,
            by_voltage_class: buckets(&VOLTAGE_CLASSES, &voltage),
            by_amperage_range: buckets(&AMPERAGE_RANGES, &amps),
            connections,
        }
    }
}

fn buckets(labels: &[&'static str], counts: &[usize]) -> Vec<Bucket> {
    labels
        .iter()
        .zip(counts)
        .map(|(label, count)| Bucket {
            label: *label,
            count: *count,
        })
        .collect()
}

/// Index into [`VOLTAGE_CLASSES`].
fn voltage_class(specs: Option<&str>) -> usize {
    const MEDIUM: usize = 0;
    const LOW: usize = 1;
    const EXTRA_LOW: usize = 2;
    const UNKNOWN: usize = 3;

    let Some(specs) = specs else {
        return UNKNOWN;
    };
    if specs.contains("kV") {
        return MEDIUM;
    }
    if specs.contains("480") || specs.contains("277") {
        return LOW;
    }
    match voltage_pattern()
        .captures(specs)
        .and_then(|c| c[1].parse::<u64>().ok())
    {
        Some(v) if v < 50 => EXTRA_LOW,
        Some(v) if v > 600 => MEDIUM,
        Some(_) => LOW,
        None => UNKNOWN,
    }
}

/// Index into [`AMPERAGE_RANGES`].
fn amperage_range(specs: Option<&str>) -> usize {
    match specs.and_then(amperage) {
        Some(a) if a < 100 => 0,
        Some(a) if a < 600 => 1,
        Some(a) if a < 2000 => 2,
        Some(_) => 3,
        None => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::sample_record;

    fn record(equipment_type: &str, specs: Option<&str>) -> Record {
        let mut r = sample_record("EDC ATL11 X", 1);
        r.equipment_type = equipment_type.to_string();
        r.specs = specs.map(str::to_string);
        r
    }

    fn count(buckets: &[Bucket], label: &str) -> usize {
        buckets.iter().find(|b| b.label == label).unwrap().count
    }

    #[test]
    fn test_voltage_classes() {
        assert_eq!(voltage_class(Some("1200A 13.8kV")), 0);
        assert_eq!(voltage_class(Some("4000A 480Y/277V")), 1);
        assert_eq!(voltage_class(Some("20A 24V")), 2);
        assert_eq!(voltage_class(Some("100A 4160V")), 0);
        assert_eq!(voltage_class(Some("100A 208V")), 1);
        assert_eq!(voltage_class(Some("100A")), 3);
        assert_eq!(voltage_class(None), 3);
    }

    #[test]
    fn test_amperage_ranges() {
        assert_eq!(amperage_range(Some("60A 208V")), 0);
        assert_eq!(amperage_range(Some("100A 480V")), 1);
        assert_eq!(amperage_range(Some("600A 480V")), 2);
        assert_eq!(amperage_range(Some("2000A 480V")), 3);
        assert_eq!(amperage_range(Some("480V")), 4);
        assert_eq!(amperage("1200AF 800AT"), Some(1200));
    }

    #[test]
    fn test_amperage_total_saturates() {
        let records = vec![
            record("MDP", Some("18000000000000000000A 480V")),
            record("MDP", Some("18000000000000000000A 480V")),
        ];
        let stats = LabelStatistics::from_records(&records);
        assert_eq!(stats.total_amperage_by_type["MDP"], u64::MAX);
        assert_eq!(count(&stats.by_amperage_range, ">2000A"), 2);
    }

    #[test]
    fn test_statistics() {
        let mut spare = record("SPARE", Some("225A"));
        spare.is_spare = true;
        spare.fed_from = None;

        let mut dual = record("UPS", None);
        dual.primary_from = Some("MSBAA110".to_string());

        let records = vec![
            record("MDP", Some("600A 480Y/277V")),
            record("MDP", Some("400A 480Y/277V")),
            spare,
            dual,
        ];
        let stats = LabelStatistics::from_records(&records);

        assert_eq!(stats.total_labels, 4);
        assert_eq!(stats.spare_labels, 1);
        assert_eq!(stats.by_equipment_type["MDP"], 2);
        assert_eq!(stats.total_amperage_by_type["MDP"], 1000);
        assert_eq!(stats.total_amperage_by_type["SPARE"], 225);
        assert!(!stats.total_amperage_by_type.contains_key("UPS"));

        assert_eq!(count(&stats.by_voltage_class, "Low Voltage (480V)"), 2);
        assert_eq!(count(&stats.by_voltage_class, "Unknown"), 2);
        assert_eq!(count(&stats.by_amperage_range, "100-600A"), 2);
        assert_eq!(count(&stats.by_amperage_range, "600-2000A"), 1);
        assert_eq!(count(&stats.by_amperage_range, "Unknown"), 1);

        assert_eq!(
            stats.connections,
            ConnectionSummary {
                single_feed: 2,
                dual_feed: 1,
                no_connection: 1,
            }
        );
    }
}
