//! Per-recipient rendering.

use std::sync::{Arc, LazyLock};

use minijinja::value::{Enumerator, Object, ObjectRepr, Value};
use minijinja::{Environment, context};
use regex::{NoExpand, Regex, RegexBuilder};

use super::ROUND_TOKEN;
use super::tokens::scan_single_brace_tokens;
use crate::config::DEFAULT_EMAIL_COLUMN;
use crate::error::TemplateError;
use crate::recipients::EmailGroup;
use crate::tabular::ExcelRow;

static ROUND_RE: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(r"\{\s*round\s*\}")
        .case_insensitive(true)
        .build()
        .unwrap()
});

/// Context variable holding substituted token values.
const VALUES_VAR: &str = "__cells";

/// Final subject and HTML body for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedTemplate {
    pub subject: String,
    pub html_body: String,
}

/// Renders subject/body templates against an [`EmailGroup`].
///
/// Body rendering runs in two passes: single-brace tokens are rewritten to
/// lookups of their values (taken from the group's first row), then the
/// result is evaluated as a Jinja template with `round`, `email` and `rows`
/// in scope.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    email_field: String,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new(DEFAULT_EMAIL_COLUMN)
    }
}

impl TemplateRenderer {
    /// `email_field` is the column header that names the recipient address.
    pub fn new(email_field: impl Into<String>) -> Self {
        Self {
            email_field: email_field.into(),
        }
    }

    pub fn email_field(&self) -> &str {
        &self.email_field
    }

    pub fn render(
        &self,
        subject: &str,
        body: &str,
        round: u32,
        group: &EmailGroup,
    ) -> Result<RenderedTemplate, TemplateError> {
        let subject = replace_round(subject, round);
        let mut body = replace_round(body, round);

        // Cell values go into the Jinja context, never into the template
        // source, so data that looks like template syntax prints verbatim.
        let first = group.first_row();
        let mut values = Vec::new();
        for token in scan_single_brace_tokens(&body) {
            if token.eq_ignore_ascii_case(ROUND_TOKEN) {
                continue;
            }
            let replacement = if token.to_lowercase() == self.email_field.to_lowercase() {
                Some(group.email.clone())
            } else {
                match first {
                    Some(row) if has_column(row, &token) => {
                        Some(row.field(&token).unwrap_or_default().to_string())
                    }
                    // Unknown columns stay as written.
                    Some(_) => None,
                    None => Some(String::new()),
                }
            };
            if let Some(value) = replacement {
                let slot = format!("{{{{ {VALUES_VAR}[{}] }}}}", values.len());
                body = replace_token(&body, &token, &slot);
                values.push(value);
            }
        }

        let rows: Vec<Value> = group
            .rows
            .iter()
            .map(|row| Value::from_object(RowObject::new(&self.email_field, row)))
            .collect();

        let mut env = Environment::new();
        env.set_keep_trailing_newline(true);
        let html_body = env
            .render_str(
                &body,
                context! {
                    round => round,
                    email => group.email.as_str(),
                    rows => rows,
                    __cells => values,
                },
            )
            .map_err(|e| TemplateError::Render(e.to_string()))?;

        Ok(RenderedTemplate { subject, html_body })
    }
}

fn has_column(row: &ExcelRow, column: &str) -> bool {
    let wanted = column.to_lowercase();
    row.fields.keys().any(|k| k.to_lowercase() == wanted)
}

fn replace_round(text: &str, round: u32) -> String {
    ROUND_RE
        .replace_all(text, NoExpand(&round.to_string()))
        .into_owned()
}

/// Replace every `{token}` (case-insensitive) with `value`.
fn replace_token(text: &str, token: &str, value: &str) -> String {
    let pattern = format!(r"\{{\s*{}\s*\}}", regex::escape(token));
    match RegexBuilder::new(&pattern).case_insensitive(true).build() {
        Ok(re) => re.replace_all(text, NoExpand(value)).into_owned(),
        Err(_) => text.to_string(),
    }
}

/// One sheet row exposed to templates as a map with case-insensitive keys.
#[derive(Debug)]
struct RowObject {
    fields: Vec<(String, String)>,
}

impl RowObject {
    fn new(email_field: &str, row: &ExcelRow) -> Self {
        let mut fields = vec![(email_field.to_string(), row.email.clone())];
        for (key, value) in &row.fields {
            let value = value.clone().unwrap_or_default();
            let lower = key.to_lowercase();
            match fields.iter_mut().find(|(k, _)| k.to_lowercase() == lower) {
                Some(slot) => slot.1 = value,
                None => fields.push((key.clone(), value)),
            }
        }
        Self { fields }
    }
}

impl Object for RowObject {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Map
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let wanted = key.as_str()?.to_lowercase();
        self.fields
            .iter()
            .find(|(k, _)| k.to_lowercase() == wanted)
            .map(|(_, v)| Value::from(v.as_str()))
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        Enumerator::Values(
            self.fields
                .iter()
                .map(|(k, _)| Value::from(k.as_str()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn row(n: u32, email: &str, fields: &[(&str, Option<&str>)]) -> ExcelRow {
        ExcelRow {
            source_file: "20250101.xlsx".into(),
            row_number: n,
            email: email.into(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn two_pc_group() -> EmailGroup {
        EmailGroup::new(
            "a@example.com",
            vec![
                row(2, "a@example.com", &[("컴퓨터 이름", Some("PC1"))]),
                row(3, "a@example.com", &[("컴퓨터 이름", Some("PC2"))]),
            ],
        )
    }

    #[test]
    fn replaces_round_and_iterates_rows() {
        let rendered = TemplateRenderer::default()
            .render(
                "[{round}회차] test",
                "<h2>{round}회차</h2><p>{이메일}</p>{% for row in rows %}{{ row[\"컴퓨터 이름\"] }}{% endfor %}",
                3,
                &two_pc_group(),
            )
            .unwrap();
        assert_eq!(rendered.subject, "[3회차] test");
        assert!(rendered.html_body.contains("<h2>3회차</h2>"));
        assert!(rendered.html_body.contains("<p>a@example.com</p>"));
        assert!(rendered.html_body.contains("PC1PC2"));
    }

    #[test]
    fn round_token_is_case_insensitive() {
        let rendered = TemplateRenderer::default()
            .render("{ROUND}", "{Round}", 3, &two_pc_group())
            .unwrap();
        assert_eq!(rendered.subject, "3");
        assert_eq!(rendered.html_body, "3");
    }

    #[test]
    fn spaced_round_token_validates_and_renders() {
        let subject = "[{ round }회차] notice";
        let body = "<p>{ Round }</p>";
        crate::template::validate(subject, body, &["이메일".to_string()], &[], 1024).unwrap();

        let rendered = TemplateRenderer::default()
            .render(subject, body, 3, &two_pc_group())
            .unwrap();
        assert_eq!(rendered.subject, "[3회차] notice");
        assert_eq!(rendered.html_body, "<p>3</p>");
    }

    #[test]
    fn cell_values_print_verbatim() {
        let group = EmailGroup::new(
            "a@example.com",
            vec![row(
                2,
                "a@example.com",
                &[("Room", Some("B{#3")), ("Note", Some("{{ rows }} {% if x %}"))],
            )],
        );
        let rendered = TemplateRenderer::default()
            .render("{round}", "<p>{Room}</p><p>{Note}</p>", 1, &group)
            .unwrap();
        assert_eq!(rendered.html_body, "<p>B{#3</p><p>{{ rows }} {% if x %}</p>");
    }

    #[test]
    fn simple_token_uses_first_row_only() {
        let rendered = TemplateRenderer::default()
            .render("{round}", "<p>{컴퓨터 이름}</p>", 1, &two_pc_group())
            .unwrap();
        assert_eq!(rendered.html_body, "<p>PC1</p>");
        assert!(!rendered.html_body.contains("PC2"));
    }

    #[test]
    fn jinja_round_variable_is_available() {
        let group = EmailGroup::new("a@example.com", vec![row(2, "a@example.com", &[])]);
        let rendered = TemplateRenderer::default()
            .render("{round}", "<p>{{ round }}</p>", 7, &group)
            .unwrap();
        assert!(rendered.html_body.contains(">7<"));
    }

    #[test]
    fn unknown_tokens_are_left_untouched() {
        let rendered = TemplateRenderer::default()
            .render("{round}", "<p>{Missing}</p>", 1, &two_pc_group())
            .unwrap();
        assert_eq!(rendered.html_body, "<p>{Missing}</p>");
    }

    #[test]
    fn tokens_substitute_empty_when_group_has_no_rows() {
        let group = EmailGroup::new("a@example.com", Vec::new());
        let rendered = TemplateRenderer::default()
            .render("{round}", "<p>{Name}</p><p>{이메일}</p>", 1, &group)
            .unwrap();
        assert_eq!(rendered.html_body, "<p></p><p>a@example.com</p>");
    }

    #[test]
    fn blank_cells_render_empty() {
        let group = EmailGroup::new(
            "a@example.com",
            vec![row(2, "a@example.com", &[("Name", None)])],
        );
        let rendered = TemplateRenderer::default()
            .render("{round}", "[{name}]", 1, &group)
            .unwrap();
        assert_eq!(rendered.html_body, "[]");
    }

    #[test]
    fn row_lookup_ignores_key_case_and_exposes_email() {
        let group = EmailGroup::new(
            "a@example.com",
            vec![row(2, "a@example.com", &[("Owner", Some("Kim"))])],
        );
        let rendered = TemplateRenderer::new("Email")
            .render(
                "{round}",
                "{% for row in rows %}{{ row['owner'] }}/{{ row['EMAIL'] }}/{{ email }}{% endfor %}",
                1,
                &group,
            )
            .unwrap();
        assert_eq!(rendered.html_body, "Kim/a@example.com/a@example.com");
    }

    #[test]
    fn css_braces_survive_rendering() {
        let rendered = TemplateRenderer::default()
            .render("{round}", "<style>p { color: red; }</style>", 1, &two_pc_group())
            .unwrap();
        assert_eq!(rendered.html_body, "<style>p { color: red; }</style>");
    }

    #[test]
    fn rendering_is_deterministic() {
        let renderer = TemplateRenderer::default();
        let body = "{% for row in rows %}<li>{{ row['컴퓨터 이름'] }}</li>{% endfor %}";
        let a = renderer.render("{round}", body, 2, &two_pc_group()).unwrap();
        let b = renderer.render("{round}", body, 2, &two_pc_group()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.html_body, "<li>PC1</li><li>PC2</li>");
    }

    #[test]
    fn broken_jinja_is_render_error() {
        let err = TemplateRenderer::default()
            .render("{round}", "{% for row in rows %}", 1, &two_pc_group())
            .unwrap_err();
        assert_eq!(err.code(), "TM005");
    }
}
