//! CSV emission for every report plus the append-as-you-go failure log.

use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

use chrono::Local;
use serde::Serialize;
use tracing::{error, info};

use phonescout_core::{FailureStage, PipelineError};

/// Write a whole report in one pass. Headers come from the row struct.
pub fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<usize, PipelineError> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| PipelineError::Parse(format!("csv open {}: {e}", path.display())))?;
    for row in rows {
        writer
            .serialize(row)
            .map_err(|e| PipelineError::Parse(format!("csv write {}: {e}", path.display())))?;
    }
    writer
        .flush()
        .map_err(|e| PipelineError::Parse(format!("csv flush {}: {e}", path.display())))?;
    info!(path = %path.display(), rows = rows.len(), "report written");
    Ok(rows.len())
}

/// Row-failure CSV, appended immediately at the point of failure.
///
/// Single writer behind a mutex; a write failure is logged and swallowed so a
/// broken log never takes a row down with it.
pub struct FailureLog {
    writer: Mutex<csv::Writer<File>>,
}

impl FailureLog {
    pub fn create(path: &Path) -> Result<Self, PipelineError> {
        let mut writer = csv::Writer::from_path(path)
            .map_err(|e| PipelineError::Parse(format!("csv open {}: {e}", path.display())))?;
        writer
            .write_record([
                "log_timestamp",
                "input_row_identifier",
                "CompanyName",
                "GivenURL",
                "stage_of_failure",
                "error_reason",
                "error_details",
            ])
            .map_err(|e| PipelineError::Parse(format!("csv header {}: {e}", path.display())))?;
        writer
            .flush()
            .map_err(|e| PipelineError::Parse(format!("csv flush {}: {e}", path.display())))?;
        Ok(Self {
            writer: Mutex::new(writer),
        })
    }

    pub fn append(
        &self,
        row_id: u64,
        company_name: &str,
        given_url: Option<&str>,
        stage: &FailureStage,
        reason: &str,
        details: &str,
    ) {
        let record = [
            Local::now().to_rfc3339(),
            row_id.to_string(),
            company_name.to_string(),
            given_url.unwrap_or("").to_string(),
            stage.to_string(),
            sanitize(reason),
            sanitize(details),
        ];
        let mut writer = match self.writer.lock() {
            Ok(writer) => writer,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writer.write_record(&record).and_then(|_| Ok(writer.flush()?)) {
            error!(row_id, stage = %stage, "failed to append to failure log: {e}");
        }
    }
}

fn sanitize(text: &str) -> String {
    text.replace(['\n', '\r'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use phonescout_core::ScrapeStatus;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Row {
        #[serde(rename = "CompanyName")]
        company: String,
        #[serde(rename = "Number")]
        number: String,
    }

    #[test]
    fn rows_get_renamed_headers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let rows = vec![Row {
            company: "Acme".to_string(),
            number: "+4930123456".to_string(),
        }];
        write_rows(&path, &rows).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("CompanyName,Number\n"));
        assert!(content.contains("Acme,+4930123456"));
    }

    #[test]
    fn failure_log_sanitizes_newlines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failed_rows.csv");
        let log = FailureLog::create(&path).unwrap();
        log.append(
            7,
            "Acme",
            Some("http://acme.de"),
            &FailureStage::Scraping(ScrapeStatus::Timeout),
            "timed\nout",
            "line1\r\nline2",
        );
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.lines().count() == 2);
        assert!(content.contains("Scraping_TimeoutError"));
        assert!(content.contains("timed out"));
    }
}
