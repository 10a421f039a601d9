//! Configuration types.
//!
//! Settings live in a JSON file with four sections (`app`, `spreadsheet`,
//! `smtp`, `mail`). Every field has a default, so a partial file is fine.
//! A handful of values can be overridden from the environment.

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::ConfigError;

/// Full application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub spreadsheet: SpreadsheetSection,
    pub smtp: SmtpSection,
    pub mail: MailSection,
}

/// What to do with files in the batch folder that don't match the pattern.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedFilePolicy {
    /// Fail the scan with a pattern-mismatch error.
    #[default]
    Error,
    /// Ignore the file.
    Skip,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub output_dir: PathBuf,
    pub log_dir: PathBuf,
    pub max_attachment_bytes: u64,
    /// Regex with a named `date` group capturing `YYYYMMDD`.
    pub file_pattern: String,
    pub unmatched_files: UnmatchedFilePolicy,
    /// Pause between consecutive bulk sends.
    pub send_delay_ms: u64,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            log_dir: PathBuf::from("logs"),
            max_attachment_bytes: 10 * 1024 * 1024,
            file_pattern: DEFAULT_FILE_PATTERN.to_string(),
            unmatched_files: UnmatchedFilePolicy::Error,
            send_delay_ms: 0,
        }
    }
}

/// Default batch filename pattern.
pub const DEFAULT_FILE_PATTERN: &str = r"^(?P<date>\d{8}).*\.xlsx$";

/// Default header of the recipient address column.
pub const DEFAULT_EMAIL_COLUMN: &str = "이메일";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpreadsheetSection {
    pub password: SecretString,
    pub email_column: String,
}

impl Default for SpreadsheetSection {
    fn default() -> Self {
        Self {
            password: SecretString::from(String::new()),
            email_column: DEFAULT_EMAIL_COLUMN.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SmtpSection {
    pub host: String,
    pub port: u16,
    /// Free text, parsed with [`crate::transport::SecurityMode::parse`].
    pub security: String,
    /// Sender address, also used as the SMTP username.
    pub sender: String,
    pub password: SecretString,
    pub timeout_secs: u64,
}

impl Default for SmtpSection {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 587,
            security: "StartTls".to_string(),
            sender: String::new(),
            password: SecretString::from(String::new()),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MailSection {
    pub subject: String,
    pub body_path: PathBuf,
    pub attachments: Vec<PathBuf>,
    pub default_test_recipient: String,
}

impl Default for MailSection {
    fn default() -> Self {
        Self {
            subject: "[{round}회차] 고위험자 안내".to_string(),
            body_path: PathBuf::from("config/body.html"),
            attachments: Vec::new(),
            default_test_recipient: "test@example.com".to_string(),
        }
    }
}

impl AppConfig {
    /// Parse configuration from JSON text.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "config".into(),
                message: "path is empty".into(),
            });
        }
        if !path.is_file() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Apply `MAILER_*` environment overrides on top of the loaded values.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(host) = lookup("MAILER_SMTP_HOST") {
            self.smtp.host = host;
        }
        if let Some(port) = lookup("MAILER_SMTP_PORT") {
            self.smtp.port = port.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "MAILER_SMTP_PORT".into(),
                message: format!("'{port}' is not a port number"),
            })?;
        }
        if let Some(sender) = lookup("MAILER_SMTP_SENDER") {
            self.smtp.sender = sender;
        }
        if let Some(password) = lookup("MAILER_SMTP_PASSWORD") {
            self.smtp.password = SecretString::from(password);
        }
        if let Some(password) = lookup("MAILER_SPREADSHEET_PASSWORD") {
            self.spreadsheet.password = SecretString::from(password);
        }
        if let Some(dir) = lookup("MAILER_OUTPUT_DIR") {
            self.app.output_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("MAILER_LOG_DIR") {
            self.app.log_dir = PathBuf::from(dir);
        }
        Ok(())
    }
}
