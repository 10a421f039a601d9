//! Bulk sender: one sequential send attempt per recipient group.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::Message;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::attempt::{Clock, LocalClock, SendAttempt, SendOutcome};
use super::message::build_message;
use crate::error::TransportError;
use crate::recipients::EmailGroup;
use crate::rounds::RoundMap;
use crate::template::TemplateRenderer;

/// Accepts one fully built message.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Return [`TransportError::Cancelled`] if the send was abandoned
    /// because the run was cancelled.
    async fn send(&self, message: Message) -> Result<(), TransportError>;
}

/// Returned by a [`PreSendHook`] to stop the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stop;

/// Runs before every send.
#[async_trait]
pub trait PreSendHook: Send + Sync {
    async fn before_send(&self, cancel: &CancellationToken) -> Result<(), Stop>;
}

/// Waits a fixed delay between sends, stopping early on cancellation.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacingHook {
    delay: Duration,
}

impl PacingHook {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl PreSendHook for PacingHook {
    async fn before_send(&self, cancel: &CancellationToken) -> Result<(), Stop> {
        if self.delay.is_zero() {
            return if cancel.is_cancelled() { Err(Stop) } else { Ok(()) };
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(Stop),
            _ = tokio::time::sleep(self.delay) => Ok(()),
        }
    }
}

/// Everything that stays fixed across one bulk run.
#[derive(Debug, Clone, Copy)]
pub struct BulkJob<'a> {
    pub sender: &'a str,
    pub subject: &'a str,
    pub body: &'a str,
    pub attachments: &'a [PathBuf],
    pub groups: &'a [EmailGroup],
    pub rounds: &'a RoundMap,
}

pub struct BulkSender {
    renderer: TemplateRenderer,
    sink: Arc<dyn MessageSink>,
    hook: Option<Arc<dyn PreSendHook>>,
    clock: Arc<dyn Clock>,
}

impl BulkSender {
    pub fn new(renderer: TemplateRenderer, sink: Arc<dyn MessageSink>) -> Self {
        Self {
            renderer,
            sink,
            hook: None,
            clock: Arc::new(LocalClock),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn PreSendHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Send to every group in order.
    ///
    /// The returned attempts are index-aligned with `job.groups`. Once
    /// cancellation is observed, the current and all later groups are
    /// recorded as stopped and nothing further is sent.
    pub async fn send_all(&self, job: &BulkJob<'_>, cancel: &CancellationToken) -> Vec<SendAttempt> {
        let mut attempts = Vec::with_capacity(job.groups.len());

        for (index, group) in job.groups.iter().enumerate() {
            if cancel.is_cancelled() {
                self.stop_remaining(&mut attempts, job, index);
                break;
            }

            if let Some(hook) = &self.hook {
                let stopped = hook.before_send(cancel).await.is_err();
                if stopped || cancel.is_cancelled() {
                    self.stop_remaining(&mut attempts, job, index);
                    break;
                }
            }

            let email = group.email.trim();
            let round = job.rounds.round_for(email);

            match self.attempt(job, group, round, cancel).await {
                SendOutcome::Sent => {
                    info!(recipient = %email, round, "Sent");
                    attempts.push(SendAttempt::sent(email, round, self.clock.now()));
                }
                SendOutcome::Failed { code, message } => {
                    warn!(recipient = %email, round, code = %code, "Send failed: {message}");
                    attempts.push(SendAttempt::failed(email, round, code, message, self.clock.now()));
                }
                SendOutcome::Cancelled => {
                    self.stop_remaining(&mut attempts, job, index);
                    break;
                }
            }
        }

        attempts
    }

    async fn attempt(
        &self,
        job: &BulkJob<'_>,
        group: &EmailGroup,
        round: u32,
        cancel: &CancellationToken,
    ) -> SendOutcome {
        let rendered = match self.renderer.render(job.subject, job.body, round, group) {
            Ok(rendered) => rendered,
            Err(e) => return SendOutcome::transport_failure(e.to_string()),
        };
        let message =
            match build_message(job.sender, group.email.trim(), &rendered, job.attachments).await {
                Ok(message) => message,
                Err(e) => return SendOutcome::transport_failure(e.to_string()),
            };

        tokio::select! {
            biased;
            result = self.sink.send(message) => match result {
                Ok(()) => SendOutcome::Sent,
                Err(TransportError::Cancelled) => SendOutcome::Cancelled,
                Err(e) => SendOutcome::transport_failure(e.to_string()),
            },
            _ = cancel.cancelled() => SendOutcome::Cancelled,
        }
    }

    fn stop_remaining(&self, attempts: &mut Vec<SendAttempt>, job: &BulkJob<'_>, from: usize) {
        let now = self.clock.now();
        let remaining = &job.groups[from..];
        warn!(remaining = remaining.len(), "Run stopped by user");
        attempts.extend(remaining.iter().map(|group| {
            let email = group.email.trim();
            SendAttempt::stopped(email, job.rounds.round_for(email), now)
        }));
    }
}
