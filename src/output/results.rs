//! Results and failures CSV files for one bulk run.

use std::borrow::Cow;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use super::{BOM, TIMESTAMP_FORMAT};
use crate::error::OutputError;
use crate::sending::{SendAttempt, SendStatus};

pub const RESULTS_HEADER: &str = "Email,Round,Status,ErrorCode,ErrorMessage,Timestamp";
pub const FAILURES_HEADER: &str = "Email,Round,ErrorCode,ErrorMessage,Timestamp";

/// Paths of the files written for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunArtifacts {
    pub results: PathBuf,
    pub failures: PathBuf,
}

/// Run identifier derived from the run start time, `yyyyMMdd-HHmmss`.
pub fn batch_id(started_at: NaiveDateTime) -> String {
    started_at.format("%Y%m%d-%H%M%S").to_string()
}

/// Write `results-<batch_id>.csv` (every attempt) and
/// `failures-<batch_id>.csv` (failed attempts only) into `output_dir`.
/// Existing files for the same batch id are replaced.
pub fn write_results(
    output_dir: &Path,
    batch_id: &str,
    attempts: &[SendAttempt],
) -> Result<RunArtifacts, OutputError> {
    if output_dir.as_os_str().is_empty() {
        return Err(OutputError::EmptyDirectory);
    }
    let batch_id = batch_id.trim();
    if batch_id.is_empty() {
        return Err(OutputError::EmptyBatchId);
    }

    std::fs::create_dir_all(output_dir)?;

    let mut results = format!("{BOM}{RESULTS_HEADER}\n");
    let mut failures = format!("{BOM}{FAILURES_HEADER}\n");

    for attempt in attempts {
        let round = attempt.round.to_string();
        let code = attempt.error_code.as_deref().unwrap_or_default();
        let message = attempt.error_message.as_deref().unwrap_or_default();
        let ts = attempt.timestamp.format(TIMESTAMP_FORMAT).to_string();

        push_record(
            &mut results,
            &[&attempt.email, &round, attempt.status.as_str(), code, message, &ts],
        );
        if attempt.status == SendStatus::Failed {
            push_record(&mut failures, &[&attempt.email, &round, code, message, &ts]);
        }
    }

    let artifacts = RunArtifacts {
        results: output_dir.join(format!("results-{batch_id}.csv")),
        failures: output_dir.join(format!("failures-{batch_id}.csv")),
    };
    std::fs::write(&artifacts.results, results)?;
    std::fs::write(&artifacts.failures, failures)?;

    tracing::debug!(
        results = %artifacts.results.display(),
        failures = %artifacts.failures.display(),
        "Run artifacts written"
    );
    Ok(artifacts)
}

fn push_record(out: &mut String, fields: &[&str]) {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(out, "{}", escape(field));
    }
    out.push('\n');
}

/// Quote fields containing a comma, quote, CR or LF; double inner quotes.
pub fn escape(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\r', '\n']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}
