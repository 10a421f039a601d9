//! Tabular data sources: where recipient rows come from.
//!
//! The pipeline only depends on [`TabularSource`]. [`XlsxSource`] reads
//! single-sheet workbooks with `calamine`, decrypting protected ones with
//! `office-crypto`; [`MemorySource`] serves sheets registered in memory
//! and backs the tests.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use calamine::{Data, Range, Reader, Xlsx, open_workbook_auto};
use secrecy::{ExposeSecret, SecretString};

use crate::error::SpreadsheetError;

/// One data row of a monthly export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcelRow {
    /// File name the row was read from.
    pub source_file: String,
    /// 1-based sheet row number.
    pub row_number: u32,
    /// Trimmed recipient address.
    pub email: String,
    /// Column header → cell value (`None` for blank cells).
    pub fields: BTreeMap<String, Option<String>>,
}

impl ExcelRow {
    /// Field lookup ignoring header case.
    pub fn field(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.to_lowercase() == column.to_lowercase())
            .and_then(|(_, v)| v.as_deref())
    }
}

/// A non-blank cell of a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub row_number: u32,
    pub value: String,
}

/// Read access to password-protected monthly exports.
///
/// Implementations acquire and release the underlying file within each
/// [`read_sheet`](Self::read_sheet) call, on error paths too. The other
/// reads are derived from it; callers that need several views of one file
/// should load the sheet once and query it.
pub trait TabularSource: Send + Sync {
    /// Open the workbook at `path` and load its only sheet.
    fn read_sheet(&self, path: &Path, password: &SecretString) -> Result<Sheet, SpreadsheetError>;

    /// Trimmed, non-blank values of the column with header `header`.
    fn read_column(
        &self,
        path: &Path,
        password: &SecretString,
        header: &str,
    ) -> Result<Vec<String>, SpreadsheetError> {
        Ok(self
            .read_column_cells(path, password, header)?
            .into_iter()
            .map(|c| c.value)
            .collect())
    }

    /// Like [`read_column`](Self::read_column) but keeps row numbers.
    fn read_column_cells(
        &self,
        path: &Path,
        password: &SecretString,
        header: &str,
    ) -> Result<Vec<Cell>, SpreadsheetError> {
        self.read_sheet(path, password)?
            .column_cells(header, &file_name_of(path))
    }

    /// Trimmed, non-blank header names in column order.
    fn read_header_row(
        &self,
        path: &Path,
        password: &SecretString,
    ) -> Result<Vec<String>, SpreadsheetError> {
        Ok(self.read_sheet(path, password)?.header_row())
    }

    /// All data rows with a non-blank address in the `email_header` column.
    fn read_rows(
        &self,
        path: &Path,
        password: &SecretString,
        email_header: &str,
    ) -> Result<Vec<ExcelRow>, SpreadsheetError> {
        self.read_sheet(path, password)?
            .data_rows(email_header, &file_name_of(path))
    }
}

/// A rectangular sheet: header row plus data rows, as text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sheet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Sheet {
    pub fn new<H, R, C>(headers: H, rows: R) -> Self
    where
        H: IntoIterator,
        H::Item: Into<String>,
        R: IntoIterator<Item = C>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: rows
                .into_iter()
                .map(|r| r.into_iter().map(Into::into).collect())
                .collect(),
        }
    }

    fn column_index(&self, header: &str, file_name: &str) -> Result<usize, SpreadsheetError> {
        let wanted = header.trim().to_lowercase();
        self.headers
            .iter()
            .position(|h| !h.trim().is_empty() && h.trim().to_lowercase() == wanted)
            .ok_or_else(|| SpreadsheetError::ColumnNotFound {
                column: header.to_string(),
                file_name: file_name.to_string(),
            })
    }

    fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Sheet row number of data row `index` (header is row 1).
    fn row_number(index: usize) -> u32 {
        index as u32 + 2
    }

    /// Non-blank cells of column `header`; `file_name` labels errors.
    pub fn column_cells(&self, header: &str, file_name: &str) -> Result<Vec<Cell>, SpreadsheetError> {
        let col = self.column_index(header, file_name)?;
        Ok((0..self.rows.len())
            .filter_map(|i| {
                let value = self.cell(i, col).trim();
                (!value.is_empty()).then(|| Cell {
                    row_number: Self::row_number(i),
                    value: value.to_string(),
                })
            })
            .collect())
    }

    /// Trimmed, non-blank header names in column order.
    pub fn header_row(&self) -> Vec<String> {
        self.headers
            .iter()
            .map(|h| h.trim())
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Data rows with a non-blank address in column `email_header`.
    pub fn data_rows(&self, email_header: &str, file_name: &str) -> Result<Vec<ExcelRow>, SpreadsheetError> {
        let email_col = self.column_index(email_header, file_name)?;
        let mut rows = Vec::new();
        for i in 0..self.rows.len() {
            let email = self.cell(i, email_col).trim();
            if email.is_empty() {
                continue;
            }
            let fields = self
                .headers
                .iter()
                .enumerate()
                .filter(|(_, h)| !h.trim().is_empty())
                .map(|(c, h)| {
                    let value = self.cell(i, c).trim();
                    let value = (!value.is_empty()).then(|| value.to_string());
                    (h.trim().to_string(), value)
                })
                .collect();
            rows.push(ExcelRow {
                source_file: file_name.to_string(),
                row_number: Self::row_number(i),
                email: email.to_string(),
                fields,
            });
        }
        Ok(rows)
    }
}

pub(crate) fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

// ── In-memory source ────────────────────────────────────────────────

/// Sheets keyed by file name; ignores passwords unless one is required.
#[derive(Debug, Default)]
pub struct MemorySource {
    sheets: RwLock<HashMap<String, Sheet>>,
    required_password: Option<String>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject reads whose password differs from `password`.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.required_password = Some(password.into());
        self
    }

    /// Register `sheet` under the file name of `path`.
    pub fn insert(&self, path: impl AsRef<Path>, sheet: Sheet) {
        let name = file_name_of(path.as_ref());
        if let Ok(mut sheets) = self.sheets.write() {
            sheets.insert(name, sheet);
        }
    }

    fn open(&self, path: &Path, password: &SecretString) -> Result<Sheet, SpreadsheetError> {
        let file_name = file_name_of(path);
        if let Some(required) = &self.required_password
            && password.expose_secret() != required.as_str()
        {
            return Err(SpreadsheetError::OpenFailed {
                file_name,
                reason: "wrong password".into(),
            });
        }
        let sheets = self
            .sheets
            .read()
            .map_err(|e| SpreadsheetError::Task(e.to_string()))?;
        sheets
            .get(&file_name)
            .cloned()
            .ok_or_else(|| SpreadsheetError::OpenFailed {
                file_name,
                reason: "no such workbook".into(),
            })
    }
}

impl TabularSource for MemorySource {
    fn read_sheet(&self, path: &Path, password: &SecretString) -> Result<Sheet, SpreadsheetError> {
        self.open(path, password)
    }
}

// ── Workbook source ─────────────────────────────────────────────────

/// Leading bytes of an OLE compound file, the container Office uses for
/// password-protected workbooks.
const OLE_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Reads `.xlsx`/`.xls`/`.ods` workbooks that contain exactly one sheet.
///
/// With a non-empty password, encrypted workbooks are decrypted in memory
/// before parsing. Unencrypted files open as-is whatever the password.
#[derive(Debug, Clone, Default)]
pub struct XlsxSource;

impl XlsxSource {
    pub fn new() -> Self {
        Self
    }

    fn load(&self, path: &Path, password: &SecretString) -> Result<Sheet, SpreadsheetError> {
        let file_name = file_name_of(path);
        let open_failed = |reason: String| SpreadsheetError::OpenFailed {
            file_name: file_name.clone(),
            reason,
        };

        let password = password.expose_secret();
        let range = if !password.is_empty() && is_compound_file(path) {
            match office_crypto::decrypt_from_file(path, password) {
                Ok(bytes) => {
                    let mut workbook = Xlsx::new(Cursor::new(bytes))
                        .map_err(|e| open_failed(e.to_string()))?;
                    single_sheet(&mut workbook, &file_name)?
                }
                // Legacy .xls files share the container without being encrypted.
                Err(decrypt) => match open_workbook_auto(path) {
                    Ok(mut workbook) => single_sheet(&mut workbook, &file_name)?,
                    Err(_) => return Err(open_failed(decrypt.to_string())),
                },
            }
        } else {
            let mut workbook =
                open_workbook_auto(path).map_err(|e| open_failed(e.to_string()))?;
            single_sheet(&mut workbook, &file_name)?
        };

        let mut rows = range.rows().map(|r| r.iter().map(cell_text).collect::<Vec<_>>());
        let headers = rows.next().unwrap_or_default();
        Ok(Sheet {
            headers,
            rows: rows.collect(),
        })
    }
}

fn is_compound_file(path: &Path) -> bool {
    let mut magic = [0u8; 8];
    File::open(path)
        .and_then(|mut f| f.read_exact(&mut magic))
        .is_ok_and(|()| magic == OLE_MAGIC)
}

fn single_sheet<RS, R>(workbook: &mut R, file_name: &str) -> Result<Range<Data>, SpreadsheetError>
where
    RS: Read + Seek,
    R: Reader<RS>,
    R::Error: std::fmt::Display,
{
    if workbook.sheet_names().len() != 1 {
        return Err(SpreadsheetError::Structure {
            file_name: file_name.to_string(),
        });
    }
    workbook
        .worksheet_range_at(0)
        .ok_or_else(|| SpreadsheetError::Structure {
            file_name: file_name.to_string(),
        })?
        .map_err(|e| SpreadsheetError::OpenFailed {
            file_name: file_name.to_string(),
            reason: e.to_string(),
        })
}

fn cell_text(data: &Data) -> String {
    match data {
        Data::Empty => String::new(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        other => other.to_string(),
    }
}

impl TabularSource for XlsxSource {
    fn read_sheet(&self, path: &Path, password: &SecretString) -> Result<Sheet, SpreadsheetError> {
        self.load(path, password)
    }
}

/// Resolve a file that must exist: absolute paths as-is, relative paths
/// against the working directory and then the executable's directory.
pub fn resolve_existing_file(path: &Path) -> Option<PathBuf> {
    if path.as_os_str().is_empty() {
        return None;
    }
    if path.is_absolute() {
        return path.is_file().then(|| path.to_path_buf());
    }
    let mut bases = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        bases.push(cwd);
    }
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
    {
        bases.push(exe_dir);
    }
    bases
        .into_iter()
        .map(|b| b.join(path))
        .find(|candidate| candidate.is_file())
}
