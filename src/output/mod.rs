//! Run artifacts written to disk: per-run CSV results and the daily log.

pub mod log_file;
pub mod results;

pub use log_file::{LogEntry, LogLevel, append};
pub use results::{RunArtifacts, batch_id, write_results};

const BOM: &str = "\u{feff}";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
