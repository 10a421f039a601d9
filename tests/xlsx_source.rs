//! Workbook reading against real `.xlsx` files, plain and password-protected.
//!
//! Both fixtures hold the same sheet; `encrypted.xlsx` is protected with
//! the password `s3cret` (ECMA-376 agile encryption, AES-256/SHA-512).

use std::path::PathBuf;

use secrecy::SecretString;

use monthly_mailer::error::SpreadsheetError;
use monthly_mailer::tabular::{TabularSource, XlsxSource};

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn secret(s: &str) -> SecretString {
    SecretString::from(s.to_string())
}

#[test]
fn plain_workbook_reads_without_password() {
    let sheet = XlsxSource::new()
        .read_sheet(&fixture("plain.xlsx"), &secret(""))
        .unwrap();
    assert_eq!(sheet.header_row(), ["이메일", "컴퓨터 이름"]);
    assert_eq!(sheet.rows.len(), 3);
}

#[test]
fn plain_workbook_ignores_configured_password() {
    let values = XlsxSource::new()
        .read_column(&fixture("plain.xlsx"), &secret("s3cret"), "이메일")
        .unwrap();
    assert_eq!(values, ["a@x.com", "b@x.com", "a@x.com"]);
}

#[test]
fn encrypted_workbook_decrypts_with_password() {
    let source = XlsxSource::new();
    let path = fixture("encrypted.xlsx");

    let headers = source.read_header_row(&path, &secret("s3cret")).unwrap();
    assert_eq!(headers, ["이메일", "컴퓨터 이름"]);

    let rows = source.read_rows(&path, &secret("s3cret"), "이메일").unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].email, "a@x.com");
    assert_eq!(rows[0].row_number, 2);
    assert_eq!(rows[0].source_file, "encrypted.xlsx");
    assert_eq!(rows[2].field("컴퓨터 이름"), Some("PC-A2"));
}

#[test]
fn encrypted_workbook_with_wrong_password_fails_to_open() {
    let err = XlsxSource::new()
        .read_header_row(&fixture("encrypted.xlsx"), &secret("wrong"))
        .unwrap_err();
    assert!(matches!(err, SpreadsheetError::OpenFailed { .. }));
    assert_eq!(err.code(), "EX003");
}

#[test]
fn encrypted_workbook_without_password_fails_to_open() {
    let err = XlsxSource::new()
        .read_header_row(&fixture("encrypted.xlsx"), &secret(""))
        .unwrap_err();
    assert_eq!(err.code(), "EX003");
}
