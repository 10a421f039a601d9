//! Error types for the monthly mailer.

use std::path::PathBuf;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(#[from] SpreadsheetError),

    #[error("Round error: {0}")]
    Round(#[from] RoundError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    #[error("Stage error: {0}")]
    Stage(#[from] StageError),
}

impl Error {
    /// Stable operator-facing code, where the underlying error has one.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::Batch(e) => Some(e.code()),
            Self::Spreadsheet(e) => Some(e.code()),
            Self::Template(e) => Some(e.code()),
            _ => None,
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Filename and month-continuity errors raised while scanning a batch folder.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    #[error("Duplicate YYYYMM detected (one file per month is allowed): {month}")]
    DuplicateMonth { month: String },

    #[error("Non-continuous YYYYMM range detected: {expected} expected, found {found}")]
    NonContinuous { expected: String, found: String },

    #[error("No matching spreadsheet files found.")]
    NoCandidates,

    #[error("Invalid spreadsheet filename (pattern mismatch): {file_name}")]
    PatternMismatch { file_name: String },

    #[error("Invalid spreadsheet filename (invalid YYYYMMDD): {file_name}")]
    InvalidDate { file_name: String },

    #[error("Invalid filename pattern: {0}")]
    InvalidPattern(String),
}

impl BatchError {
    /// Stable error code shown to operators.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateMonth { .. } => "EX001",
            Self::NonContinuous { .. } => "EX002",
            Self::NoCandidates => "EX003",
            Self::PatternMismatch { .. } | Self::InvalidDate { .. } | Self::InvalidPattern(_) => {
                "EX004"
            }
        }
    }
}

/// Errors from a tabular data source.
#[derive(Debug, thiserror::Error)]
pub enum SpreadsheetError {
    /// Wrong password, corrupt or unreadable workbook.
    #[error("Failed to open workbook: {file_name}: {reason}")]
    OpenFailed { file_name: String, reason: String },

    /// Workbook shape is not what the pipeline expects (e.g. several sheets).
    #[error("Workbook must have exactly one sheet: {file_name}")]
    Structure { file_name: String },

    #[error("Column not found: '{column}' ({file_name})")]
    ColumnNotFound { column: String, file_name: String },

    #[error("{count} invalid email address(es) found")]
    InvalidEmails { count: usize },

    #[error("Spreadsheet folder is empty or does not exist: {}", .0.display())]
    FolderMissing(PathBuf),

    #[error("Spreadsheet read task failed: {0}")]
    Task(String),
}

impl SpreadsheetError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::OpenFailed { .. } => "EX003",
            Self::Structure { .. } => "EX010",
            Self::ColumnNotFound { .. } => "EX005",
            Self::InvalidEmails { .. } => "EX006",
            Self::FolderMissing(_) | Self::Task(_) => "EX000",
        }
    }
}

/// Round calculation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoundError {
    #[error("At least one month is required.")]
    NoMonths,
}

/// Template validation and rendering errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("Subject must contain {{round}}.")]
    MissingRoundToken,

    #[error("Unknown token: {token}")]
    UnknownToken { token: String },

    #[error("Attachment not found: {path}")]
    AttachmentMissing { path: String },

    #[error("Attachment too large: {path} ({size} bytes)")]
    AttachmentTooLarge { path: String, size: u64 },

    #[error("Template render failed: {0}")]
    Render(String),

    #[error("Body template not readable: {path}: {reason}")]
    BodyUnreadable { path: String, reason: String },
}

impl TemplateError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingRoundToken => "TM001",
            Self::UnknownToken { .. } => "TM002",
            Self::AttachmentMissing { .. } => "TM003",
            Self::AttachmentTooLarge { .. } => "TM004",
            Self::Render(_) => "TM005",
            Self::BodyUnreadable { .. } => "TM006",
        }
    }
}

/// Mail transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Invalid SMTP settings: {0}")]
    InvalidSettings(String),

    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("SMTP connection failed: {0}")]
    Connect(String),

    #[error("SMTP authentication failed: {0}")]
    Auth(String),

    #[error("SMTP send failed: {0}")]
    Send(String),

    /// The send was abandoned because the run was cancelled.
    #[error("Send cancelled")]
    Cancelled,
}

/// Run artifact writing errors.
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("Output directory is empty.")]
    EmptyDirectory,

    #[error("Batch id is empty.")]
    EmptyBatchId,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stage ordering violations detected by the campaign orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageError {
    #[error("{action} requires {requires} success.")]
    Prerequisite {
        action: &'static str,
        requires: &'static str,
    },

    #[error("No recipients found in latest spreadsheet.")]
    NoRecipients,

    #[error("Invalid {role} address (RFC 5322): '{address}'")]
    InvalidAddress { role: &'static str, address: String },
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
