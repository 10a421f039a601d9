//! Outgoing message assembly.

use std::path::{Path, PathBuf};

use lettre::Message;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};

use crate::error::TransportError;
use crate::template::RenderedTemplate;

/// Parse a bare address into a mailbox without display name.
pub fn mailbox(address: &str) -> Result<Mailbox, TransportError> {
    let trimmed = address.trim();
    trimmed
        .parse()
        .map(|addr| Mailbox::new(None, addr))
        .map_err(|e: lettre::address::AddressError| TransportError::InvalidAddress {
            address: trimmed.to_string(),
            reason: e.to_string(),
        })
}

/// Build an HTML message with From = Reply-To = `sender`.
///
/// Attachments are read from disk here, so a file removed after validation
/// surfaces as a per-recipient failure rather than a stage failure.
pub async fn build_message(
    sender: &str,
    recipient: &str,
    rendered: &RenderedTemplate,
    attachments: &[PathBuf],
) -> Result<Message, TransportError> {
    let from = mailbox(sender)?;
    let builder = Message::builder()
        .from(from.clone())
        .reply_to(from)
        .to(mailbox(recipient)?)
        .subject(rendered.subject.as_str());

    let message = if attachments.is_empty() {
        builder
            .header(ContentType::TEXT_HTML)
            .body(rendered.html_body.clone())
    } else {
        let mut parts = MultiPart::mixed().singlepart(SinglePart::html(rendered.html_body.clone()));
        for path in attachments {
            parts = parts.singlepart(attachment_part(path).await?);
        }
        builder.multipart(parts)
    };

    message.map_err(|e| TransportError::Build(e.to_string()))
}

async fn attachment_part(path: &Path) -> Result<SinglePart, TransportError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| TransportError::Build(format!("{}: {e}", path.display())))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "attachment".to_string());
    let content_type = ContentType::parse("application/octet-stream")
        .map_err(|e| TransportError::Build(e.to_string()))?;
    Ok(Attachment::new(file_name).body(bytes, content_type))
}
