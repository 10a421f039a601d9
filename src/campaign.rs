//! Campaign orchestration.
//!
//! Drives the four gated stages in order (spreadsheet validation, transport
//! verification, template validation, test send) and the final bulk send.
//! Every stage method records its outcome in the [`StageGate`] and logs a
//! failure with its stable code before returning the error to the caller.
//! Stage methods reset their own stage and every later one first, so a
//! re-run never leaves a stale success downstream.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::batch::{BatchScanResult, BatchScanner, enumerate_candidates};
use crate::config::{AppConfig, MailSection, SmtpSection, SpreadsheetSection};
use crate::error::{BatchError, Error, Result, SpreadsheetError, StageError, TemplateError};
use crate::output::{RunArtifacts, batch_id, write_results};
use crate::recipients::{self, EmailGroup};
use crate::rounds::{RoundMap, calculate_latest_rounds};
use crate::sending::{BulkJob, BulkSender, Clock, LocalClock, PacingHook, SendAttempt, build_message};
use crate::stage::{Stage, StageEvent, StageGate, StageStatus};
use crate::tabular::{TabularSource, resolve_existing_file};
use crate::template::{self, AttachmentInfo, TemplateRenderer};
use crate::transport::{MailTransport, SmtpSettings, TransportSink};

/// Invalid addresses logged one by one before switching to a count.
const INVALID_ADDRESS_LOG_LIMIT: usize = 50;

/// Output of a successful spreadsheet stage.
#[derive(Debug, Clone)]
pub struct PreparedBatch {
    pub scan: BatchScanResult,
    /// Valid, deduplicated addresses of the latest month, sheet order.
    pub recipients: Vec<String>,
    pub rounds: RoundMap,
    /// Dispatch order.
    pub groups: Vec<EmailGroup>,
    /// Header row of the latest month's file.
    pub columns: Vec<String>,
}

/// Output of a successful template stage.
#[derive(Debug, Clone)]
pub struct PreparedTemplate {
    pub body: String,
    /// Resolved attachment paths.
    pub attachments: Vec<PathBuf>,
    /// Header row of the latest month's file.
    pub columns: Vec<String>,
}

/// Outcome of a bulk run.
#[derive(Debug, Clone)]
pub struct BulkReport {
    pub batch_id: String,
    /// Index-aligned with the prepared groups.
    pub attempts: Vec<SendAttempt>,
    pub artifacts: RunArtifacts,
}

impl BulkReport {
    pub fn sent_count(&self) -> usize {
        self.attempts.iter().filter(|a| a.is_sent()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.attempts.len() - self.sent_count()
    }
}

pub struct Campaign {
    config: AppConfig,
    source: Arc<dyn TabularSource>,
    transport: Arc<dyn MailTransport>,
    clock: Arc<dyn Clock>,
    gate: StageGate,
    test_recipient: String,
    batch: Option<PreparedBatch>,
    template: Option<PreparedTemplate>,
}

impl Campaign {
    pub fn new(
        config: AppConfig,
        source: Arc<dyn TabularSource>,
        transport: Arc<dyn MailTransport>,
    ) -> Self {
        let test_recipient = config.mail.default_test_recipient.clone();
        Self {
            config,
            source,
            transport,
            clock: Arc::new(LocalClock),
            gate: StageGate::new(),
            test_recipient,
            batch: None,
            template: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn gate(&self) -> &StageGate {
        &self.gate
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StageEvent> {
        self.gate.subscribe()
    }

    pub fn batch(&self) -> Option<&PreparedBatch> {
        self.batch.as_ref()
    }

    pub fn template(&self) -> Option<&PreparedTemplate> {
        self.template.as_ref()
    }

    pub fn test_recipient(&self) -> &str {
        &self.test_recipient
    }

    // ── Input changes ───────────────────────────────────────────────

    /// Replace spreadsheet settings; every stage must be re-run.
    pub fn set_spreadsheet(&mut self, section: SpreadsheetSection) {
        self.config.spreadsheet = section;
        self.reset_from(Stage::Spreadsheet);
    }

    /// Replace SMTP settings; transport and later stages must be re-run.
    pub fn set_smtp(&mut self, section: SmtpSection) {
        self.config.smtp = section;
        self.reset_from(Stage::Transport);
    }

    /// Replace subject/body/attachments; template and test send must be re-run.
    pub fn set_mail(&mut self, section: MailSection) {
        self.config.mail = section;
        self.reset_from(Stage::Template);
    }

    pub fn set_max_attachment_bytes(&mut self, max: u64) {
        self.config.app.max_attachment_bytes = max;
        self.reset_from(Stage::Template);
    }

    pub fn set_test_recipient(&mut self, address: impl Into<String>) {
        self.test_recipient = address.into();
        self.reset_from(Stage::TestSend);
    }

    fn reset_from(&mut self, stage: Stage) {
        self.gate.invalidate_from(stage);
        if stage <= Stage::Spreadsheet {
            self.batch = None;
        }
        if stage <= Stage::Template {
            self.template = None;
        }
    }

    fn finish<T>(&mut self, stage: Stage, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.gate.set(stage, StageStatus::Success),
            Err(e) => {
                match e.code() {
                    Some(code) => error!(stage = %stage, code, "[{code}] {e}"),
                    None => error!(stage = %stage, "{e}"),
                }
                self.gate.set(stage, StageStatus::Fail);
            }
        }
        result
    }

    fn require(&self, ready: bool, action: &'static str, requires: &'static str) -> Result<()> {
        if ready {
            Ok(())
        } else {
            Err(StageError::Prerequisite { action, requires }.into())
        }
    }

    // ── Stage 1: spreadsheet ────────────────────────────────────────

    /// Scan `folder`, check every month's address column, compute rounds and
    /// group the latest month's rows per recipient.
    pub async fn validate_spreadsheet(&mut self, folder: &Path) -> Result<&PreparedBatch> {
        self.reset_from(Stage::Spreadsheet);
        let result = self.prepare_batch(folder).await;
        let batch = self.finish(Stage::Spreadsheet, result)?;
        info!(
            range = %batch.scan.range_text(),
            files = batch.scan.file_count(),
            latest = %batch.scan.latest().file_name,
            recipients = batch.recipients.len(),
            groups = batch.groups.len(),
            "Spreadsheet validated"
        );
        Ok(&*self.batch.insert(batch))
    }

    async fn prepare_batch(&self, folder: &Path) -> Result<PreparedBatch> {
        if !folder.is_dir() {
            return Err(SpreadsheetError::FolderMissing(folder.to_path_buf()).into());
        }

        let scanner =
            BatchScanner::new(&self.config.app.file_pattern, self.config.app.unmatched_files)?;
        let scan = scanner.validate_monthly_continuity(enumerate_candidates(folder))?;

        // Earlier months only need the address column; the latest file is
        // loaded once and supplies cells, rows and headers.
        let mut paths: Vec<PathBuf> = scan.files.iter().map(|f| f.path.clone()).collect();
        let latest_path = paths.pop().ok_or(BatchError::NoCandidates)?;
        let latest_name = scan.latest().file_name.clone();
        let column = self.config.spreadsheet.email_column.clone();
        let (month_cells, rows, columns) = self
            .read_blocking(move |source, password| {
                let mut cells = paths
                    .iter()
                    .map(|p| source.read_column_cells(p, password, &column))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                let sheet = source.read_sheet(&latest_path, password)?;
                cells.push(sheet.column_cells(&column, &latest_name)?);
                let rows = sheet.data_rows(&column, &latest_name)?;
                Ok((cells, rows, sheet.header_row()))
            })
            .await?;

        let mut invalid = 0usize;
        for (file, cells) in scan.files.iter().zip(&month_cells) {
            for cell in cells.iter().filter(|c| !recipients::is_valid_address(&c.value)) {
                invalid += 1;
                if invalid <= INVALID_ADDRESS_LOG_LIMIT {
                    error!(
                        file = %file.file_name,
                        row = cell.row_number,
                        "Invalid email address: '{}'",
                        cell.value
                    );
                }
            }
        }
        if invalid > 0 {
            if invalid > INVALID_ADDRESS_LOG_LIMIT {
                error!(
                    "Invalid email address(es): {} more not shown",
                    invalid - INVALID_ADDRESS_LOG_LIMIT
                );
            }
            return Err(SpreadsheetError::InvalidEmails { count: invalid }.into());
        }

        let month_sets: Vec<Vec<String>> = month_cells
            .iter()
            .map(|cells| cells.iter().map(|c| c.value.clone()).collect())
            .collect();
        let rounds = calculate_latest_rounds(&month_sets)?;

        let latest_values = month_sets.last().cloned().unwrap_or_default();
        let addresses = recipients::from_column_values(&latest_values);

        let groups = recipients::build_groups(&addresses, rows);

        Ok(PreparedBatch {
            scan,
            recipients: addresses,
            rounds,
            groups,
            columns,
        })
    }

    /// Run a spreadsheet read on the blocking pool.
    async fn read_blocking<T, F>(&self, read: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn TabularSource, &SecretString) -> std::result::Result<T, SpreadsheetError>
            + Send
            + 'static,
    {
        let source = Arc::clone(&self.source);
        let password = self.config.spreadsheet.password.clone();
        let value = tokio::task::spawn_blocking(move || read(source.as_ref(), &password))
            .await
            .map_err(|e| SpreadsheetError::Task(e.to_string()))??;
        Ok(value)
    }

    // ── Stage 2: transport ──────────────────────────────────────────

    /// Connect and authenticate with the configured SMTP settings.
    pub async fn verify_transport(&mut self) -> Result<()> {
        self.reset_from(Stage::Transport);
        let result = self.check_transport().await;
        self.finish(Stage::Transport, result)?;
        info!("SMTP verified (connect+auth)");
        Ok(())
    }

    async fn check_transport(&self) -> Result<()> {
        self.require(
            self.gate.status(Stage::Spreadsheet) == StageStatus::Success,
            "Transport verification",
            "spreadsheet",
        )?;
        let settings = SmtpSettings::from_config(&self.config.smtp);
        self.transport.verify(&settings).await?;
        Ok(())
    }

    // ── Stage 3: template ───────────────────────────────────────────

    /// Check subject, body tokens and attachments against the latest
    /// month's columns.
    pub async fn validate_template(&mut self) -> Result<&PreparedTemplate> {
        self.reset_from(Stage::Template);
        let result = self.prepare_template().await;
        let prepared = self.finish(Stage::Template, result)?;
        info!(
            attachments = prepared.attachments.len(),
            "Template validated (tokens/attachments)"
        );
        Ok(&*self.template.insert(prepared))
    }

    async fn prepare_template(&self) -> Result<PreparedTemplate> {
        self.require(
            self.gate.state().ready_for_template_check(),
            "Template validation",
            "spreadsheet and transport",
        )?;
        let columns = match &self.batch {
            Some(batch) => batch.columns.clone(),
            None => return Err(StageError::NoRecipients.into()),
        };

        let body = self.read_body().await?;
        let (infos, attachments) = self.probe_attachments();

        template::validate(
            &self.config.mail.subject,
            &body,
            &columns,
            &infos,
            self.config.app.max_attachment_bytes,
        )?;

        Ok(PreparedTemplate {
            body,
            attachments,
            columns,
        })
    }

    async fn read_body(&self) -> Result<String> {
        let configured = &self.config.mail.body_path;
        let unreadable = |reason: String| TemplateError::BodyUnreadable {
            path: configured.display().to_string(),
            reason,
        };
        let path = resolve_existing_file(configured).ok_or_else(|| unreadable("not found".into()))?;
        let body = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| unreadable(e.to_string()))?;
        Ok(body)
    }

    /// Probe every configured attachment; returns the probes and the
    /// resolved paths of those that exist.
    fn probe_attachments(&self) -> (Vec<AttachmentInfo>, Vec<PathBuf>) {
        let mut infos = Vec::new();
        let mut resolved = Vec::new();
        for path in &self.config.mail.attachments {
            match resolve_existing_file(path) {
                Some(found) => {
                    infos.push(AttachmentInfo::probe(&found));
                    resolved.push(found);
                }
                None => infos.push(AttachmentInfo::missing(path.display().to_string())),
            }
        }
        (infos, resolved)
    }

    // ── Stage 4: test send ──────────────────────────────────────────

    /// Send the first group's message, with its real round, to the test
    /// recipient instead of the group's address.
    pub async fn send_test(&mut self) -> Result<()> {
        self.reset_from(Stage::TestSend);
        let result = self.deliver_test().await;
        self.finish(Stage::TestSend, result)
    }

    async fn deliver_test(&self) -> Result<()> {
        self.require(
            self.gate.state().ready_for_test_send(),
            "Test send",
            "spreadsheet, transport and template",
        )?;
        let batch = self.batch.as_ref().ok_or(StageError::NoRecipients)?;
        let group = batch.groups.first().ok_or(StageError::NoRecipients)?;

        let to = self.test_recipient.trim();
        if !recipients::is_valid_address(to) {
            return Err(StageError::InvalidAddress {
                role: "test recipient",
                address: to.to_string(),
            }
            .into());
        }
        let sender = self.config.smtp.sender.trim();
        if !recipients::is_valid_address(sender) {
            return Err(StageError::InvalidAddress {
                role: "sender",
                address: sender.to_string(),
            }
            .into());
        }

        // Files may have changed since the template stage.
        let body = self.read_body().await?;
        let (infos, attachments) = self.probe_attachments();
        for info in &infos {
            if !info.exists {
                return Err(TemplateError::AttachmentMissing {
                    path: info.path.clone(),
                }
                .into());
            }
            if info.length_bytes > self.config.app.max_attachment_bytes {
                return Err(TemplateError::AttachmentTooLarge {
                    path: info.path.clone(),
                    size: info.length_bytes,
                }
                .into());
            }
        }

        let round = batch.rounds.round_for(&group.email);
        let rendered = self
            .renderer()
            .render(&self.config.mail.subject, &body, round, group)?;
        let message = build_message(sender, to, &rendered, &attachments).await?;

        let settings = SmtpSettings::from_config(&self.config.smtp);
        self.transport.send(&settings, message).await?;
        info!(to = %to, data = %group.email, round, "Test mail sent (accepted)");
        Ok(())
    }

    // ── Bulk send ───────────────────────────────────────────────────

    /// Send to every group, then write the results and failures files.
    ///
    /// Cancelling `cancel` stops the run cooperatively; unsent recipients
    /// are recorded as stopped.
    pub async fn send_all(&self, cancel: &CancellationToken) -> Result<BulkReport> {
        self.require(
            self.gate.state().ready_for_bulk_send(),
            "Bulk send",
            "spreadsheet, transport, template and test send",
        )?;
        let (Some(batch), Some(prepared)) = (&self.batch, &self.template) else {
            return Err(StageError::NoRecipients.into());
        };

        let started = self.clock.now();
        let batch_id = batch_id(started);
        info!(batch_id = %batch_id, recipients = batch.groups.len(), "Bulk send started");

        let sink = TransportSink::new(
            Arc::clone(&self.transport),
            SmtpSettings::from_config(&self.config.smtp),
        );
        let sender = BulkSender::new(self.renderer(), Arc::new(sink))
            .with_hook(Arc::new(PacingHook::new(Duration::from_millis(
                self.config.app.send_delay_ms,
            ))))
            .with_clock(Arc::clone(&self.clock));

        let job = BulkJob {
            sender: self.config.smtp.sender.trim(),
            subject: &self.config.mail.subject,
            body: &prepared.body,
            attachments: &prepared.attachments,
            groups: &batch.groups,
            rounds: &batch.rounds,
        };
        let attempts = sender.send_all(&job, cancel).await;

        let artifacts = write_results(&self.config.app.output_dir, &batch_id, &attempts)?;
        let report = BulkReport {
            batch_id,
            attempts,
            artifacts,
        };
        info!(
            batch_id = %report.batch_id,
            sent = report.sent_count(),
            failed = report.failed_count(),
            results = %report.artifacts.results.display(),
            "Bulk send finished"
        );
        Ok(report)
    }

    fn renderer(&self) -> TemplateRenderer {
        TemplateRenderer::new(self.config.spreadsheet.email_column.clone())
    }
}
