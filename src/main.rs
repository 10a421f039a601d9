use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use monthly_mailer::campaign::Campaign;
use monthly_mailer::config::AppConfig;
use monthly_mailer::logging;
use monthly_mailer::tabular::XlsxSource;
use monthly_mailer::transport::SmtpTransport;

#[derive(Parser, Debug)]
#[command(
    name = "monthly-mailer",
    version,
    about = "Validate monthly spreadsheet exports and mail every recipient their round notice",
    subcommand_required = true,
    arg_required_else_help = true
)]
struct Cli {
    /// JSON configuration file
    #[arg(long, short, value_name = "FILE", default_value = "config/appsettings.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check the batch folder, the SMTP login and the template
    Validate {
        #[arg(value_name = "FOLDER")]
        folder: PathBuf,
    },
    /// Validate, then send the first recipient's message to a test address
    TestSend {
        #[arg(value_name = "FOLDER")]
        folder: PathBuf,
        /// Test recipient (defaults to mail.default_test_recipient)
        #[arg(long, value_name = "ADDR")]
        to: Option<String>,
    },
    /// Run every stage, then send to all recipients (Ctrl-C stops)
    Send {
        #[arg(value_name = "FOLDER")]
        folder: PathBuf,
        /// Test recipient for the pre-send check
        #[arg(long, value_name = "ADDR")]
        to: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Validate,
    TestSend,
    Send,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    let cli = Cli::parse();

    let mut config = AppConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    config.apply_env()?;

    logging::init(&config.app.log_dir).context("initializing logging")?;
    tracing::info!(config = %cli.config.display(), "Config loaded");

    let mut campaign = Campaign::new(
        config,
        Arc::new(XlsxSource::new()),
        Arc::new(SmtpTransport::new()),
    );

    let (folder, to, mode) = match cli.command {
        Command::Validate { folder } => (folder, None, Mode::Validate),
        Command::TestSend { folder, to } => (folder, to, Mode::TestSend),
        Command::Send { folder, to } => (folder, to, Mode::Send),
    };

    campaign.validate_spreadsheet(&folder).await?;
    campaign.verify_transport().await?;
    campaign.validate_template().await?;
    if mode == Mode::Validate {
        eprintln!("Validation passed.");
        return Ok(());
    }

    if let Some(to) = to {
        campaign.set_test_recipient(to);
    }
    campaign.send_test().await?;
    if mode == Mode::TestSend {
        eprintln!("Test mail sent to {}.", campaign.test_recipient());
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Stop requested; remaining recipients will be recorded as stopped");
            on_signal.cancel();
        }
    });

    let report = campaign.send_all(&cancel).await?;
    eprintln!(
        "Sent {} / failed {} (results: {}, failures: {})",
        report.sent_count(),
        report.failed_count(),
        report.artifacts.results.display(),
        report.artifacts.failures.display()
    );
    Ok(())
}
