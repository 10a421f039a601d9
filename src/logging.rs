//! Tracing setup: console output plus the daily run log.

use std::fmt::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer, fmt as tracing_fmt};

use crate::output::log_file::{self, LogEntry, LogLevel};

/// Install the global subscriber: an `EnvFilter`-controlled console layer
/// (default `info`) and a [`RunLogLayer`] writing to `log_dir`.
pub fn init(log_dir: &Path) -> Result<(), TryInitError> {
    let console = tracing_fmt::layer().with_target(false).with_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    );

    tracing_subscriber::registry()
        .with(console)
        .with(RunLogLayer::new(log_dir).with_filter(run_log_filter()))
        .try_init()
}

/// INFO and above from this crate only; dependency chatter stays on the
/// console.
pub fn run_log_filter() -> EnvFilter {
    EnvFilter::new(RUN_LOG_DIRECTIVE)
}

const RUN_LOG_DIRECTIVE: &str = "monthly_mailer=info";

/// Appends INFO/WARN/ERROR events to `app-YYYYMMDD.log`.
///
/// Each line is the event message followed by its fields as `key=value`.
pub struct RunLogLayer {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl RunLogLayer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn level(level: &Level) -> Option<LogLevel> {
        match *level {
            Level::ERROR => Some(LogLevel::Error),
            Level::WARN => Some(LogLevel::Warn),
            Level::INFO => Some(LogLevel::Info),
            _ => None,
        }
    }
}

impl<S: Subscriber> Layer<S> for RunLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let Some(level) = Self::level(event.metadata().level()) else {
            return;
        };

        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        let entry = LogEntry::new(Local::now().naive_local(), level, visitor.finish());

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = log_file::append(&self.dir, &entry) {
            // Logging through tracing here would recurse.
            eprintln!("run log write failed: {e}");
        }
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl LineVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.trim_start().to_string()
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}
