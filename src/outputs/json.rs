//! JSON run reports.
//!
//! # Output Structure
//!
//! ```text
//! report_dir/
//! ├── 2025-05-06T00-30-00Z.json
//! └── 2025-05-06T06-30-00Z.json
//! ```

use crate::models::RunReport;
use chrono::Utc;
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, instrument};

/// Write a [`RunReport`] to `{report_dir}/{started_at}.json`.
///
/// The file is named after the run's start time in UTC (the current time if
/// the run never started), with `:` replaced so the name is portable.
#[instrument(level = "info", skip_all, fields(report_dir = %report_dir.display()))]
pub async fn write_run_report(report: &RunReport, report_dir: &Path) -> Result<PathBuf, Box<dyn Error>> {
    let json = serde_json::to_string_pretty(report)?;

    if let Err(e) = fs::create_dir_all(report_dir).await {
        error!(dir = %report_dir.display(), error = %e, "Failed to create report dir");
        return Err(e.into());
    }

    let started = report.started_at.unwrap_or_else(Utc::now);
    let path = report_dir.join(format!("{}.json", started.format("%Y-%m-%dT%H-%M-%SZ")));

    fs::write(&path, json).await?;
    info!(path = %path.display(), "Wrote run report");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_write_run_report() {
        let dir = tempfile::tempdir().unwrap();
        let report = RunReport {
            started_at: Some(Utc.with_ymd_and_hms(2025, 5, 6, 0, 30, 0).unwrap()),
            stage: "done".into(),
            discovered: 12,
            committed: 7,
            ..Default::default()
        };

        let nested = dir.path().join("reports");
        let path = write_run_report(&report, &nested).await.unwrap();
        assert_eq!(path, nested.join("2025-05-06T00-30-00Z.json"));

        let written: RunReport = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.discovered, 12);
        assert_eq!(written.committed, 7);
        assert_eq!(written.stage, "done");
    }

    #[tokio::test]
    async fn test_write_fails_when_dir_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, "x").unwrap();
        assert!(write_run_report(&RunReport::default(), &file).await.is_err());
    }
}
