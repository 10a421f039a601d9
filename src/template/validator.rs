//! Template validation: gates the Template stage.

use std::collections::HashSet;
use std::path::Path;

use super::ROUND_TOKEN;
use super::tokens::{scan_row_column_keys, scan_single_brace_tokens};
use crate::error::TemplateError;

/// An attachment as seen on disk at validation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentInfo {
    pub path: String,
    pub exists: bool,
    pub length_bytes: u64,
}

impl AttachmentInfo {
    /// Stat `path`; anything unreadable counts as missing.
    pub fn probe(path: &Path) -> Self {
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_file() => Self {
                path: path.display().to_string(),
                exists: true,
                length_bytes: meta.len(),
            },
            _ => Self::missing(path.display().to_string()),
        }
    }

    pub fn missing(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            exists: false,
            length_bytes: 0,
        }
    }
}

/// Check subject, body tokens and attachments, returning the first problem.
///
/// Order: round token in subject (TM001), body references against
/// `columns` (TM002), attachment existence (TM003), attachment size (TM004).
pub fn validate(
    subject: &str,
    body: &str,
    columns: &[String],
    attachments: &[AttachmentInfo],
    max_attachment_bytes: u64,
) -> Result<(), TemplateError> {
    let has_round = scan_single_brace_tokens(subject)
        .iter()
        .any(|t| t.eq_ignore_ascii_case(ROUND_TOKEN));
    if !has_round {
        return Err(TemplateError::MissingRoundToken);
    }

    let known: HashSet<String> = columns
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(str::to_lowercase)
        .collect();

    let references = scan_single_brace_tokens(body)
        .into_iter()
        .chain(scan_row_column_keys(body));
    for token in references {
        if token.eq_ignore_ascii_case(ROUND_TOKEN) {
            continue;
        }
        if !known.contains(&token.to_lowercase()) {
            return Err(TemplateError::UnknownToken { token });
        }
    }

    for attachment in attachments {
        if !attachment.exists {
            return Err(TemplateError::AttachmentMissing {
                path: attachment.path.clone(),
            });
        }
        if attachment.length_bytes > max_attachment_bytes {
            return Err(TemplateError::AttachmentTooLarge {
                path: attachment.path.clone(),
                size: attachment.length_bytes,
            });
        }
    }

    Ok(())
}
