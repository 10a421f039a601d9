//! Per-recipient send records.

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Recorded when the transport rejects or fails a send.
pub const TRANSPORT_ERROR_CODE: &str = "SM001";
/// Recorded for every recipient not attempted because the run was cancelled.
pub const STOPPED_CODE: &str = "US001";
pub const STOPPED_MESSAGE: &str = "Stopped by user.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SendStatus {
    Sent,
    Failed,
}

impl SendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for SendStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the audit record of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendAttempt {
    pub email: String,
    pub round: u32,
    pub status: SendStatus,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub timestamp: NaiveDateTime,
}

impl SendAttempt {
    pub fn sent(email: impl Into<String>, round: u32, timestamp: NaiveDateTime) -> Self {
        Self {
            email: email.into(),
            round,
            status: SendStatus::Sent,
            error_code: None,
            error_message: None,
            timestamp,
        }
    }

    pub fn failed(
        email: impl Into<String>,
        round: u32,
        code: impl Into<String>,
        message: impl Into<String>,
        timestamp: NaiveDateTime,
    ) -> Self {
        Self {
            email: email.into(),
            round,
            status: SendStatus::Failed,
            error_code: Some(code.into()),
            error_message: Some(message.into()),
            timestamp,
        }
    }

    pub fn stopped(email: impl Into<String>, round: u32, timestamp: NaiveDateTime) -> Self {
        Self::failed(email, round, STOPPED_CODE, STOPPED_MESSAGE, timestamp)
    }

    pub fn is_sent(&self) -> bool {
        self.status == SendStatus::Sent
    }
}

/// Result of one send call, as seen by the bulk loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Failed { code: String, message: String },
    Cancelled,
}

impl SendOutcome {
    pub fn transport_failure(message: impl Into<String>) -> Self {
        Self::Failed {
            code: TRANSPORT_ERROR_CODE.to_string(),
            message: message.into(),
        }
    }
}

/// Source of attempt timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Local wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}
