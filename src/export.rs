//! CSV export of a finished job's records.

use std::path::Path;

use crate::controller::{JobInfo, JobState, JobStatus};
use crate::error::{Error, Result};
use crate::record::Record;

const HEADER: [&str; 8] = [
    "#",
    "Equipment Type",
    "Device Tag",
    "Fed From",
    "Primary From",
    "Specs",
    "Spare",
    "Page",
];

/// Render `records` as CSV, one row per record in list order.
///
/// Only terminal jobs can be exported; a running job fails with
/// [`Error::JobNotFinished`].
pub fn to_csv(info: &JobInfo, status: &JobStatus, records: &[Record]) -> Result<Vec<u8>> {
    if !status.state.is_terminal() {
        return Err(Error::JobNotFinished(status.state));
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(HEADER)?;

    for (i, record) in records.iter().enumerate() {
        writer.write_record([
            (i + 1).to_string(),
            record.equipment_type.clone(),
            record.device_tag.clone(),
            record.fed_from.clone().unwrap_or_default(),
            record.primary_from.clone().unwrap_or_default(),
            record.specs.clone().unwrap_or_default(),
            if record.is_spare { "Yes" } else { "No" }.to_string(),
            record.source_page.to_string(),
        ])?;
    }

    let bytes = writer.into_inner().map_err(|e| Error::Io(e.into_error()))?;
    tracing::info!(
        "Exported {} records for job {} ({} bytes)",
        records.len(),
        info.id,
        bytes.len()
    );
    Ok(bytes)
}

/// Download name: `<stem>_labels.csv`, marked partial for cancelled or failed jobs.
pub fn export_filename(info: &JobInfo, state: JobState) -> String {
    let stem = Path::new(&info.filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("job");
    // Goes into a quoted Content-Disposition value.
    let stem: String = stem
        .chars()
        .map(|c| if c.is_control() || c == '"' || c == '\\' { '_' } else { c })
        .collect();

    match state {
        JobState::Cancelled | JobState::Failed => format!("{}_partial_labels.csv", stem),
        _ => format!("{}_labels.csv", stem),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::sample_record;
    use chrono::Utc;
    use uuid::Uuid;

    fn info(filename: &str) -> JobInfo {
        JobInfo {
            id: Uuid::new_v4(),
            filename: filename.to_string(),
            input_digest: String::new(),
            submitted_at: Utc::now(),
        }
    }

    fn status(state: JobState) -> JobStatus {
        JobStatus {
            state,
            total_pages: Some(2),
            current_page: 2,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    #[test]
    fn test_csv_rows_in_list_order() {
        let mut spare = sample_record("EDC ATL11 MDPAA110, SPARE", 2);
        spare.is_spare = true;
        spare.fed_from = None;
        let records = vec![sample_record("EDC ATL11 MSBAA110", 1), spare];

        let csv = to_csv(&info("site.pdf"), &status(JobState::Completed), &records).unwrap();
        let text = String::from_utf8(csv).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "#,Equipment Type,Device Tag,Fed From,Primary From,Specs,Spare,Page");
        assert_eq!(lines[1], "1,MSB,EDC ATL11 MSBAA110,TRNAA110,,4000A 480Y/277V,No,1");
        assert_eq!(lines[2], "2,MSB,\"EDC ATL11 MDPAA110, SPARE\",,,4000A 480Y/277V,Yes,2");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_running_job_cannot_export() {
        let err = to_csv(&info("site.pdf"), &status(JobState::Processing), &[]).unwrap_err();
        assert!(matches!(err, Error::JobNotFinished(JobState::Processing)));
    }

    #[test]
    fn test_export_filename() {
        let info = info("uploads/ATL11 one-line.pdf");
        assert_eq!(export_filename(&info, JobState::Completed), "ATL11 one-line_labels.csv");
        assert_eq!(
            export_filename(&info, JobState::Cancelled),
            "ATL11 one-line_partial_labels.csv"
        );
        assert_eq!(
            export_filename(&info, JobState::Failed),
            "ATL11 one-line_partial_labels.csv"
        );
    }

    #[test]
    fn test_export_filename_is_header_safe() {
        let info = info("bad\"name\\x\r\n.pdf");
        assert_eq!(export_filename(&info, JobState::Completed), "bad_name_x___labels.csv");
    }
}
