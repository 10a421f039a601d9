//! Message templates: token scanning, validation and rendering.
//!
//! Templates mix two syntaxes. Single-brace tokens (`{round}`, `{Name}`)
//! are plain substitutions. Jinja-style constructs (`{{ }}`, `{% %}`,
//! `{# #}`) are evaluated afterwards against the recipient's rows.

pub mod renderer;
pub mod tokens;
pub mod validator;

pub use renderer::{RenderedTemplate, TemplateRenderer};
pub use tokens::{scan_row_column_keys, scan_single_brace_tokens};
pub use validator::{AttachmentInfo, validate};

/// Name of the round token, matched case-insensitively.
pub const ROUND_TOKEN: &str = "round";
