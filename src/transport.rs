//! Mail transport: SMTP connect/authenticate/send via lettre.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::SmtpSection;
use crate::error::TransportError;
use crate::sending::MessageSink;

/// How the SMTP connection is secured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityMode {
    /// Implicit TLS on port 465, opportunistic STARTTLS elsewhere.
    #[default]
    Auto,
    None,
    SslOnConnect,
    StartTls,
    StartTlsWhenAvailable,
}

impl SecurityMode {
    /// Parse configuration text, ignoring case and surrounding whitespace.
    /// Blank or unrecognized text means [`SecurityMode::Auto`].
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        [
            ("none", Self::None),
            ("auto", Self::Auto),
            ("sslonconnect", Self::SslOnConnect),
            ("starttls", Self::StartTls),
            ("starttlswhenavailable", Self::StartTlsWhenAvailable),
        ]
        .into_iter()
        .find(|(name, _)| value.eq_ignore_ascii_case(name))
        .map_or(Self::Auto, |(_, mode)| mode)
    }
}

/// Everything needed to open an authenticated SMTP session.
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub security: SecurityMode,
    pub username: String,
    pub password: SecretString,
    pub timeout: Duration,
}

impl SmtpSettings {
    pub fn from_config(section: &SmtpSection) -> Self {
        Self {
            host: section.host.trim().to_string(),
            port: section.port,
            security: SecurityMode::parse(&section.security),
            username: section.sender.trim().to_string(),
            password: section.password.clone(),
            timeout: Duration::from_secs(section.timeout_secs),
        }
    }

    /// Reject settings that cannot possibly connect.
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.host.is_empty() {
            return Err(TransportError::InvalidSettings("SMTP host is empty.".into()));
        }
        if self.port == 0 {
            return Err(TransportError::InvalidSettings(
                "SMTP port must be 1..65535.".into(),
            ));
        }
        if self.username.is_empty() {
            return Err(TransportError::InvalidSettings(
                "SMTP username (sender) is empty.".into(),
            ));
        }
        if self.password.expose_secret().is_empty() {
            return Err(TransportError::InvalidSettings("SMTP password is empty.".into()));
        }
        if self.timeout.is_zero() {
            return Err(TransportError::InvalidSettings("Timeout must be > 0.".into()));
        }
        Ok(())
    }
}

/// Connect/authenticate/send capability.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Open a session and authenticate, then disconnect.
    async fn verify(&self, settings: &SmtpSettings) -> Result<(), TransportError>;

    /// Deliver one message over a fresh session.
    async fn send(&self, settings: &SmtpSettings, message: Message) -> Result<(), TransportError>;
}

/// SMTP transport backed by lettre's tokio client.
#[derive(Debug, Clone, Default)]
pub struct SmtpTransport;

impl SmtpTransport {
    pub fn new() -> Self {
        Self
    }

    fn client(settings: &SmtpSettings) -> Result<AsyncSmtpTransport<Tokio1Executor>, TransportError> {
        settings.validate()?;

        let params = || {
            TlsParameters::new(settings.host.clone())
                .map_err(|e| TransportError::Connect(format!("TLS setup failed: {e}")))
        };
        let tls = match settings.security {
            SecurityMode::None => Tls::None,
            SecurityMode::SslOnConnect => Tls::Wrapper(params()?),
            SecurityMode::StartTls => Tls::Required(params()?),
            SecurityMode::StartTlsWhenAvailable => Tls::Opportunistic(params()?),
            SecurityMode::Auto if settings.port == 465 => Tls::Wrapper(params()?),
            SecurityMode::Auto => Tls::Opportunistic(params()?),
        };

        let creds = Credentials::new(
            settings.username.clone(),
            settings.password.expose_secret().to_string(),
        );

        Ok(
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(settings.host.as_str())
                .port(settings.port)
                .tls(tls)
                .credentials(creds)
                .timeout(Some(settings.timeout))
                .build(),
        )
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn verify(&self, settings: &SmtpSettings) -> Result<(), TransportError> {
        let client = Self::client(settings)?;
        match client.test_connection().await {
            Ok(true) => {
                tracing::info!(host = %settings.host, port = settings.port, "SMTP connection verified");
                Ok(())
            }
            Ok(false) => Err(TransportError::Connect(format!(
                "{}:{} did not accept the session",
                settings.host, settings.port
            ))),
            Err(e) if e.is_permanent() => Err(TransportError::Auth(e.to_string())),
            Err(e) => Err(TransportError::Connect(e.to_string())),
        }
    }

    async fn send(&self, settings: &SmtpSettings, message: Message) -> Result<(), TransportError> {
        let client = Self::client(settings)?;
        client
            .send(message)
            .await
            .map(|_| ())
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

/// Binds a transport to fixed settings so the bulk sender can push messages.
#[derive(Clone)]
pub struct TransportSink {
    transport: Arc<dyn MailTransport>,
    settings: SmtpSettings,
}

impl TransportSink {
    pub fn new(transport: Arc<dyn MailTransport>, settings: SmtpSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }
}

#[async_trait]
impl MessageSink for TransportSink {
    async fn send(&self, message: Message) -> Result<(), TransportError> {
        self.transport.send(&self.settings, message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SmtpSettings {
        SmtpSettings {
            host: "smtp.example.com".into(),
            port: 587,
            security: SecurityMode::StartTls,
            username: "sender@example.com".into(),
            password: SecretString::from("pw".to_string()),
            timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn parses_known_modes_case_insensitively() {
        assert_eq!(SecurityMode::parse("none"), SecurityMode::None);
        assert_eq!(SecurityMode::parse(" SslOnConnect "), SecurityMode::SslOnConnect);
        assert_eq!(SecurityMode::parse("STARTTLS"), SecurityMode::StartTls);
        assert_eq!(
            SecurityMode::parse("starttlswhenavailable"),
            SecurityMode::StartTlsWhenAvailable
        );
        assert_eq!(SecurityMode::parse("Auto"), SecurityMode::Auto);
    }

    #[test]
    fn unknown_or_blank_mode_is_auto() {
        assert_eq!(SecurityMode::parse(""), SecurityMode::Auto);
        assert_eq!(SecurityMode::parse("   "), SecurityMode::Auto);
        assert_eq!(SecurityMode::parse("tls1.3"), SecurityMode::Auto);
    }

    #[test]
    fn settings_from_config_trims_and_parses() {
        let section = SmtpSection {
            host: " smtp.example.com ".into(),
            port: 465,
            security: "sslonconnect".into(),
            sender: " me@example.com".into(),
            password: SecretString::from("pw".to_string()),
            timeout_secs: 10,
        };
        let s = SmtpSettings::from_config(&section);
        assert_eq!(s.host, "smtp.example.com");
        assert_eq!(s.username, "me@example.com");
        assert_eq!(s.security, SecurityMode::SslOnConnect);
        assert_eq!(s.timeout, Duration::from_secs(10));
    }

    #[test]
    fn validate_rejects_incomplete_settings() {
        assert!(settings().validate().is_ok());

        let mut s = settings();
        s.host.clear();
        assert!(matches!(s.validate(), Err(TransportError::InvalidSettings(_))));

        let mut s = settings();
        s.port = 0;
        assert!(s.validate().is_err());

        let mut s = settings();
        s.password = SecretString::from(String::new());
        assert!(s.validate().is_err());

        let mut s = settings();
        s.timeout = Duration::ZERO;
        assert!(s.validate().is_err());
    }

    #[tokio::test]
    async fn verify_with_invalid_settings_fails_before_connecting() {
        let mut s = settings();
        s.username.clear();
        let err = SmtpTransport::new().verify(&s).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidSettings(_)));
    }
}
