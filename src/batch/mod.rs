//! Monthly batch discovery: filename parsing and month continuity.

pub mod month;
pub mod scanner;

pub use month::YearMonth;
pub use scanner::{BatchFile, BatchScanResult, BatchScanner, enumerate_candidates};
