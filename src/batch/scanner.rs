//! Batch scanner: classifies export files by the date in their name and
//! checks that they form an unbroken chain of months.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use regex::{Regex, RegexBuilder};
use tracing::debug;

use super::month::YearMonth;
use crate::config::{DEFAULT_FILE_PATTERN, UnmatchedFilePolicy};
use crate::error::BatchError;

/// One validated source file of the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFile {
    pub path: PathBuf,
    pub file_name: String,
    pub date: NaiveDate,
    pub month: YearMonth,
}

/// Ordered, gap-free set of monthly files.
#[derive(Debug, Clone)]
pub struct BatchScanResult {
    /// Ascending by month.
    pub files: Vec<BatchFile>,
    pub min_month: YearMonth,
    pub max_month: YearMonth,
}

impl BatchScanResult {
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// The most recent month's file.
    pub fn latest(&self) -> &BatchFile {
        // Never empty: the scanner rejects an empty batch.
        &self.files[self.files.len() - 1]
    }

    /// `YYYYMM-YYYYMM` for display.
    pub fn range_text(&self) -> String {
        format!("{}-{}", self.min_month, self.max_month)
    }
}

/// Filename classifier and continuity checker.
#[derive(Debug, Clone)]
pub struct BatchScanner {
    pattern: Regex,
    unmatched: UnmatchedFilePolicy,
}

impl Default for BatchScanner {
    fn default() -> Self {
        Self::new(DEFAULT_FILE_PATTERN, UnmatchedFilePolicy::Error).unwrap()
    }
}

impl BatchScanner {
    /// Build a scanner from a case-insensitive pattern with a named `date`
    /// group capturing eight digits.
    pub fn new(pattern: &str, unmatched: UnmatchedFilePolicy) -> Result<Self, BatchError> {
        let pattern = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| BatchError::InvalidPattern(e.to_string()))?;
        if !pattern.capture_names().any(|n| n == Some("date")) {
            return Err(BatchError::InvalidPattern(
                "pattern has no named 'date' group".into(),
            ));
        }
        Ok(Self { pattern, unmatched })
    }

    /// Classify `paths` and check they cover consecutive months, one file each.
    pub fn validate_monthly_continuity<I, P>(&self, paths: I) -> Result<BatchScanResult, BatchError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut parsed = Vec::new();
        for path in paths {
            let path = path.as_ref();
            match self.classify(path)? {
                Some(file) => parsed.push(file),
                None => debug!(path = %path.display(), "Skipping file not matching batch pattern"),
            }
        }

        if parsed.is_empty() {
            return Err(BatchError::NoCandidates);
        }

        // Stable sort keeps input order within a month, which only matters
        // for reporting the duplicate.
        parsed.sort_by_key(|f| f.month);

        if let Some(pair) = parsed.windows(2).find(|w| w[0].month == w[1].month) {
            return Err(BatchError::DuplicateMonth {
                month: pair[0].month.to_string(),
            });
        }

        for pair in parsed.windows(2) {
            let expected = pair[0].month.add_months(1);
            if pair[1].month != expected {
                return Err(BatchError::NonContinuous {
                    expected: expected.to_string(),
                    found: pair[1].month.to_string(),
                });
            }
        }

        let min_month = parsed[0].month;
        let max_month = parsed[parsed.len() - 1].month;
        Ok(BatchScanResult {
            files: parsed,
            min_month,
            max_month,
        })
    }

    /// `Ok(None)` means the file was skipped by policy.
    fn classify(&self, path: &Path) -> Result<Option<BatchFile>, BatchError> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let Some(date_text) = self
            .pattern
            .captures(&file_name)
            .and_then(|c| c.name("date"))
            .map(|m| m.as_str().to_string())
        else {
            return match self.unmatched {
                UnmatchedFilePolicy::Error => Err(BatchError::PatternMismatch { file_name }),
                UnmatchedFilePolicy::Skip => Ok(None),
            };
        };

        let date = parse_yyyymmdd(&date_text).ok_or_else(|| BatchError::InvalidDate {
            file_name: file_name.clone(),
        })?;

        Ok(Some(BatchFile {
            path: path.to_path_buf(),
            file_name,
            date,
            month: YearMonth::of(date),
        }))
    }
}

fn parse_yyyymmdd(text: &str) -> Option<NaiveDate> {
    if text.len() != 8 || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year: i32 = text[0..4].parse().ok()?;
    let month: u32 = text[4..6].parse().ok()?;
    let day: u32 = text[6..8].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// List `.xlsx` files directly inside `dir`, sorted by path.
///
/// A missing or unreadable directory yields an empty list.
pub fn enumerate_candidates(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("xlsx"))
        })
        .collect();
    files.sort();
    files
}
