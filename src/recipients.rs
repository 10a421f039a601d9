//! Recipient list helpers: address validation, deduplication and grouping
//! of the latest month's rows per recipient.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use lettre::Address;

use crate::tabular::ExcelRow;

/// All rows of the latest month that belong to one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailGroup {
    pub email: String,
    /// Sheet order preserved.
    pub rows: Vec<ExcelRow>,
}

impl EmailGroup {
    pub fn new(email: impl Into<String>, rows: Vec<ExcelRow>) -> Self {
        Self {
            email: email.into(),
            rows,
        }
    }

    pub fn first_row(&self) -> Option<&ExcelRow> {
        self.rows.first()
    }
}

/// Accept only a bare addr-spec (`local@domain`), no display name or angle
/// brackets. Surrounding whitespace is ignored.
pub fn is_valid_address(value: &str) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() || !trimmed.contains('@') {
        return false;
    }
    match Address::from_str(trimmed) {
        Ok(addr) => addr.to_string().eq_ignore_ascii_case(trimmed),
        Err(_) => false,
    }
}

/// Build the recipient list from raw column values: trimmed, valid
/// addresses only, deduplicated case-insensitively, first spelling and
/// first-seen order kept.
pub fn from_column_values<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut recipients = Vec::new();
    for value in values {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() || !is_valid_address(trimmed) {
            continue;
        }
        if seen.insert(trimmed.to_lowercase()) {
            recipients.push(trimmed.to_string());
        }
    }
    recipients
}

/// Group `rows` by recipient, emitting groups in `recipients` order.
///
/// Recipients without rows produce no group; rows whose address is not in
/// `recipients` are dropped.
pub fn build_groups(recipients: &[String], rows: Vec<ExcelRow>) -> Vec<EmailGroup> {
    let mut by_email: HashMap<String, Vec<ExcelRow>> = HashMap::new();
    for row in rows {
        by_email
            .entry(row.email.trim().to_lowercase())
            .or_default()
            .push(row);
    }

    recipients
        .iter()
        .filter_map(|email| {
            by_email
                .remove(&email.to_lowercase())
                .map(|rows| EmailGroup::new(email.clone(), rows))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn row(n: u32, email: &str, pc: &str) -> ExcelRow {
        ExcelRow {
            source_file: "20250101.xlsx".into(),
            row_number: n,
            email: email.into(),
            fields: BTreeMap::from([("PC".to_string(), Some(pc.to_string()))]),
        }
    }

    #[test]
    fn rejects_missing_at_sign() {
        assert!(!is_valid_address("not-an-email"));
    }

    #[test]
    fn rejects_display_names_and_brackets() {
        assert!(!is_valid_address("Alice <alice@example.com>"));
        assert!(!is_valid_address("<alice@example.com>"));
        assert!(!is_valid_address("alice@"));
        assert!(!is_valid_address("@example.com"));
        assert!(!is_valid_address("a b@example.com"));
    }

    #[test]
    fn accepts_plain_addresses() {
        assert!(is_valid_address("alice@example.com"));
        assert!(is_valid_address("  Alice.Smith+tag@Example.COM "));
    }

    #[test]
    fn column_values_are_trimmed_validated_and_deduplicated() {
        let recipients =
            from_column_values([" a@x.com ", "bad", "", "A@X.COM", "b@x.com"]);
        assert_eq!(recipients, ["a@x.com", "b@x.com"]);
    }

    #[test]
    fn first_spelling_wins() {
        let recipients = from_column_values(["Bob@X.com", "bob@x.com"]);
        assert_eq!(recipients, ["Bob@X.com"]);
    }

    #[test]
    fn groups_follow_recipient_order_and_keep_row_order() {
        let recipients = vec!["b@x.com".to_string(), "a@x.com".to_string(), "c@x.com".to_string()];
        let rows = vec![
            row(2, "a@x.com", "PC1"),
            row(3, "B@x.com", "PC9"),
            row(4, "a@x.com", "PC2"),
            row(5, "stray@x.com", "PC5"),
        ];
        let groups = build_groups(&recipients, rows);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].email, "b@x.com");
        assert_eq!(groups[0].rows.len(), 1);
        assert_eq!(groups[1].email, "a@x.com");
        let numbers: Vec<_> = groups[1].rows.iter().map(|r| r.row_number).collect();
        assert_eq!(numbers, [2, 4]);
        assert_eq!(groups[1].first_row().unwrap().field("PC"), Some("PC1"));
    }
}
