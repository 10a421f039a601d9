//! End-to-end pipeline: spreadsheet → transport → template → test send →
//! bulk send, with in-memory spreadsheets and a recording transport.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use lettre::Message;
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;

use monthly_mailer::campaign::Campaign;
use monthly_mailer::config::AppConfig;
use monthly_mailer::error::TransportError;
use monthly_mailer::sending::{Clock, SendStatus};
use monthly_mailer::stage::{Stage, StageStatus};
use monthly_mailer::tabular::{MemorySource, Sheet};
use monthly_mailer::transport::{MailTransport, SmtpSettings};

struct FixedClock;

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 10)
            .unwrap()
            .and_hms_opt(14, 30, 0)
            .unwrap()
    }
}

/// Records every delivered message. Rejects recipients listed in `reject`;
/// cancels `cancel_after` once that many messages have been accepted.
#[derive(Default)]
struct StubTransport {
    reject: Vec<String>,
    cancel_after: Option<(usize, CancellationToken)>,
    delivered: Mutex<Vec<(String, String)>>,
}

impl StubTransport {
    fn recipients(&self) -> Vec<String> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .map(|(to, _)| to.clone())
            .collect()
    }
}

#[async_trait]
impl MailTransport for StubTransport {
    async fn verify(&self, _settings: &SmtpSettings) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send(&self, _settings: &SmtpSettings, message: Message) -> Result<(), TransportError> {
        let to = message.envelope().to()[0].to_string();
        if self.reject.contains(&to) {
            return Err(TransportError::Send(format!("550 mailbox unavailable: {to}")));
        }
        let raw = String::from_utf8_lossy(&message.formatted()).into_owned();
        let mut delivered = self.delivered.lock().unwrap();
        delivered.push((to, raw));
        if let Some((n, token)) = &self.cancel_after
            && delivered.len() == *n
        {
            token.cancel();
        }
        Ok(())
    }
}

struct Workspace {
    _dir: tempfile::TempDir,
    folder: PathBuf,
    output: PathBuf,
    config: AppConfig,
    source: Arc<MemorySource>,
}

fn month(source: &MemorySource, folder: &Path, name: &str, rows: &[[&str; 2]]) {
    std::fs::write(folder.join(name), b"").unwrap();
    source.insert(name, Sheet::new(["이메일", "컴퓨터 이름"], rows.iter().map(|r| r.to_vec())));
}

fn workspace() -> Workspace {
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("exports");
    std::fs::create_dir_all(&folder).unwrap();
    let source = Arc::new(MemorySource::new().with_password("s3cret"));

    month(&source, &folder, "20250105_report.xlsx", &[["a@x.com", "PC-A0"]]);
    month(
        &source,
        &folder,
        "20250203_report.xlsx",
        &[["a@x.com", "PC-A0"], ["c@x.com", "PC-C0"]],
    );
    month(
        &source,
        &folder,
        "20250303_report.xlsx",
        &[
            ["a@x.com", "PC-A1"],
            ["b@x.com", "PC-B1"],
            ["A@X.com", "PC-A2"],
            ["c@x.com", "PC-C1"],
        ],
    );

    let body = dir.path().join("body.html");
    std::fs::write(
        &body,
        "<h2>Round {round}</h2><p>{이메일}</p><ul>{% for row in rows %}<li>{{ row[\"컴퓨터 이름\"] }}</li>{% endfor %}</ul>",
    )
    .unwrap();
    let attachment = dir.path().join("guide.txt");
    std::fs::write(&attachment, b"how to fix your PC").unwrap();

    let output = dir.path().join("output");
    let mut config = AppConfig::default();
    config.app.output_dir = output.clone();
    config.spreadsheet.password = SecretString::from("s3cret".to_string());
    config.smtp.host = "smtp.example.com".into();
    config.smtp.sender = "security@example.com".into();
    config.smtp.password = SecretString::from("pw".to_string());
    config.mail.body_path = body;
    config.mail.attachments = vec![attachment];
    config.mail.default_test_recipient = "qa@example.com".into();

    Workspace {
        _dir: dir,
        folder,
        output,
        config,
        source,
    }
}

async fn ready_campaign(ws: &Workspace, transport: Arc<StubTransport>) -> Campaign {
    let mut campaign = Campaign::new(ws.config.clone(), ws.source.clone(), transport)
        .with_clock(Arc::new(FixedClock));
    campaign.validate_spreadsheet(&ws.folder).await.unwrap();
    campaign.verify_transport().await.unwrap();
    campaign.validate_template().await.unwrap();
    campaign.send_test().await.unwrap();
    campaign
}

#[tokio::test]
async fn full_run_sends_grouped_messages_and_writes_results() {
    let ws = workspace();
    let transport = Arc::new(StubTransport {
        reject: vec!["b@x.com".into()],
        ..Default::default()
    });
    let campaign = ready_campaign(&ws, transport.clone()).await;

    let batch = campaign.batch().unwrap();
    assert_eq!(batch.scan.range_text(), "202501-202503");
    assert_eq!(batch.recipients, ["a@x.com", "b@x.com", "c@x.com"]);

    let report = campaign.send_all(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.batch_id, "20250310-143000");

    let summary: Vec<_> = report
        .attempts
        .iter()
        .map(|a| (a.email.as_str(), a.round, a.status))
        .collect();
    assert_eq!(
        summary,
        [
            ("a@x.com", 3, SendStatus::Sent),
            ("b@x.com", 1, SendStatus::Failed),
            ("c@x.com", 2, SendStatus::Sent),
        ]
    );
    assert_eq!(report.attempts[1].error_code.as_deref(), Some("SM001"));

    // Test send first, then the two accepted recipients.
    assert_eq!(transport.recipients(), ["qa@example.com", "a@x.com", "c@x.com"]);

    let delivered = transport.delivered.lock().unwrap();
    let to_a = &delivered[1].1;
    assert!(to_a.contains("PC-A1"));
    assert!(to_a.contains("PC-A2"));
    assert!(to_a.contains("guide.txt"));
    assert!(to_a.contains("Reply-To: security@example.com"));

    let results = std::fs::read_to_string(ws.output.join("results-20250310-143000.csv")).unwrap();
    assert!(results.starts_with("\u{feff}Email,Round,Status,ErrorCode,ErrorMessage,Timestamp\n"));
    assert!(results.contains("a@x.com,3,SENT,,,2025-03-10 14:30:00"));
    let failures = std::fs::read_to_string(ws.output.join("failures-20250310-143000.csv")).unwrap();
    assert_eq!(failures.lines().count(), 2);
    assert!(failures.contains("b@x.com,1,SM001,"));
}

#[tokio::test]
async fn cancellation_mid_run_marks_the_rest_stopped() {
    let ws = workspace();
    let cancel = CancellationToken::new();
    // The test send is delivery 1, the first bulk recipient is delivery 2.
    let transport = Arc::new(StubTransport {
        cancel_after: Some((2, cancel.clone())),
        ..Default::default()
    });
    let campaign = ready_campaign(&ws, transport.clone()).await;

    let report = campaign.send_all(&cancel).await.unwrap();
    assert_eq!(report.attempts.len(), 3);
    assert_eq!(report.attempts[0].status, SendStatus::Sent);
    for stopped in &report.attempts[1..] {
        assert_eq!(stopped.error_code.as_deref(), Some("US001"));
        assert_eq!(stopped.error_message.as_deref(), Some("Stopped by user."));
    }
    assert_eq!(report.failed_count(), 2);
    assert_eq!(transport.recipients().len(), 2);
}

#[tokio::test]
async fn wrong_spreadsheet_password_fails_first_stage() {
    let ws = workspace();
    let mut config = ws.config.clone();
    config.spreadsheet.password = SecretString::from("wrong".to_string());
    let mut campaign = Campaign::new(config, ws.source.clone(), Arc::new(StubTransport::default()));

    let err = campaign.validate_spreadsheet(&ws.folder).await.unwrap_err();
    assert_eq!(err.code(), Some("EX003"));
    assert_eq!(campaign.gate().status(Stage::Spreadsheet), StageStatus::Fail);
    assert!(!campaign.gate().gates().ready_for_template_check);
}

#[tokio::test]
async fn stage_events_follow_the_pipeline() {
    let ws = workspace();
    let mut campaign = Campaign::new(
        ws.config.clone(),
        ws.source.clone(),
        Arc::new(StubTransport::default()),
    );
    let mut events = campaign.subscribe();

    campaign.validate_spreadsheet(&ws.folder).await.unwrap();
    campaign.verify_transport().await.unwrap();

    let mut last = None;
    while let Ok(event) = events.try_recv() {
        last = Some(event);
    }
    let last = last.unwrap();
    assert_eq!(last.stage, Stage::Transport);
    assert_eq!(last.status, StageStatus::Success);
    assert!(last.gates.ready_for_template_check);
    assert!(!last.gates.ready_for_test_send);
}
