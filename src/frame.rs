//! Raw tabular input: uploaded CSV or spreadsheet content as untyped string
//! cells under lowercased headers. Typing happens in `ingestion`.

use crate::error::{LedgerExplorerError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use calamine::{open_workbook_auto_from_rs, Data, DataType, Reader};
use csv::{ReaderBuilder, Trim};
use log::debug;
use std::io::Cursor;
use std::path::{Path, PathBuf};

pub const COL_ACCOUNT: &str = "account";
pub const COL_AMOUNT: &str = "amount";
pub const COL_DATE: &str = "date";
pub const COL_DESCRIPTION: &str = "description";
pub const COL_FULL_ACCOUNT_NAME: &str = "full account name";
pub const COL_PARENT_ACCOUNT: &str = "parent account";
pub const COL_NOTES: &str = "notes";
pub const COL_MEMO: &str = "memo";
pub const COL_ERA_NAME: &str = "name";
pub const COL_DATE_START: &str = "date_start";
pub const COL_DATE_END: &str = "date_end";

const SPREADSHEET_EXTENSIONS: [&str; 5] = ["xls", "xlsx", "xlsm", "xlsb", "ods"];

/// Where an upload comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    /// Base64 content, optionally as a `data:<mime>;base64,<payload>` URL.
    Inline { filename: String, content: String },
    Bytes { filename: String, bytes: Vec<u8> },
    Path(PathBuf),
    /// Fetched with `remote::read_url` when the `remote` feature is enabled.
    Url(String),
}

impl Source {
    pub fn filename(&self) -> String {
        match self {
            Source::Inline { filename, .. } | Source::Bytes { filename, .. } => filename.clone(),
            Source::Path(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            Source::Url(url) => filename_from_url(url),
        }
    }
}

pub fn filename_from_url(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    without_query
        .rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or(without_query)
        .to_string()
}

pub fn is_spreadsheet(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| SPREADSHEET_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Decodes inline upload content, accepting either bare base64 or a data URL.
pub fn decode_inline(content: &str) -> Result<Vec<u8>> {
    let payload = match content.split_once(";base64,") {
        Some((_, payload)) => payload,
        None => content,
    };
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| LedgerExplorerError::LoadError(format!("invalid base64 upload: {}", e)))
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawFrame {
    pub name: String,
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl RawFrame {
    /// Headers are trimmed and lowercased; short rows are padded.
    pub fn new(name: &str, columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let columns: Vec<String> = columns
            .into_iter()
            .map(|c| c.trim().trim_start_matches('\u{feff}').to_lowercase())
            .collect();
        let width = columns.len();
        let rows = rows
            .into_iter()
            .filter(|r| r.iter().any(|cell| !cell.trim().is_empty()))
            .map(|mut r| {
                r.resize(width, String::new());
                r
            })
            .collect();
        Self {
            name: name.to_string(),
            columns,
            rows,
        }
    }

    pub fn read(source: &Source) -> Result<Self> {
        match source {
            Source::Inline { filename, content } => {
                Self::from_bytes(filename, &decode_inline(content)?)
            }
            Source::Bytes { filename, bytes } => Self::from_bytes(filename, bytes),
            Source::Path(path) => {
                let bytes = std::fs::read(path).map_err(|e| {
                    LedgerExplorerError::LoadError(format!("cannot read {}: {}", path.display(), e))
                })?;
                Self::from_bytes(&source.filename(), &bytes)
            }
            Source::Url(url) => Err(LedgerExplorerError::LoadError(format!(
                "cannot read {} synchronously; fetch it with the remote loader",
                url
            ))),
        }
    }

    pub fn from_bytes(filename: &str, bytes: &[u8]) -> Result<Self> {
        if is_spreadsheet(filename) {
            Self::from_workbook_bytes(filename, bytes)
        } else {
            Self::from_csv_bytes(filename, bytes)
        }
    }

    pub fn from_csv_bytes(name: &str, bytes: &[u8]) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .flexible(true)
            .trim(Trim::All)
            .from_reader(bytes);

        let columns: Vec<String> = reader
            .headers()
            .map_err(|e| LedgerExplorerError::LoadError(format!("{}: unreadable header: {}", name, e)))?
            .iter()
            .map(str::to_string)
            .collect();
        if columns.iter().all(|c| c.is_empty()) {
            return Err(LedgerExplorerError::LoadError(format!("{}: no header row", name)));
        }

        let mut rows = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record.map_err(|e| {
                LedgerExplorerError::LoadError(format!("{}: row {}: {}", name, line + 2, e))
            })?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        debug!("Parsed {} CSV rows from {}", rows.len(), name);
        Ok(Self::new(name, columns, rows))
    }

    /// Reads the first sheet of an XLS/XLSX/ODS workbook.
    pub fn from_workbook_bytes(name: &str, bytes: &[u8]) -> Result<Self> {
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
            .map_err(|e| LedgerExplorerError::LoadError(format!("{}: cannot open workbook: {}", name, e)))?;
        let first_sheet = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| LedgerExplorerError::LoadError(format!("{}: workbook has no sheets", name)))?;
        let range = workbook.worksheet_range(&first_sheet).map_err(|e| {
            LedgerExplorerError::LoadError(format!("{}: cannot read sheet '{}': {}", name, first_sheet, e))
        })?;

        let mut cells = range.rows().map(|row| row.iter().map(cell_text).collect::<Vec<_>>());
        let columns = cells
            .next()
            .ok_or_else(|| LedgerExplorerError::LoadError(format!("{}: sheet is empty", name)))?;
        let rows: Vec<Vec<String>> = cells.collect();
        debug!("Parsed {} spreadsheet rows from {}", rows.len(), name);
        Ok(Self::new(name, columns, rows))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Non-blank cell value.
    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }

    pub fn set_cell(&mut self, row: usize, column: usize, value: String) {
        if let Some(cell) = self.rows.get_mut(row).and_then(|r| r.get_mut(column)) {
            *cell = value;
        }
    }

    /// Appends an empty column unless it already exists; returns its index.
    pub fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(idx) = self.column_index(name) {
            return idx;
        }
        self.columns.push(name.to_string());
        for row in self.rows.iter_mut() {
            row.push(String::new());
        }
        self.columns.len() - 1
    }

    /// Renames user headers to canonical names. A rename is skipped when
    /// the canonical column is already present.
    pub fn rename_columns(&mut self, mapping: &[(String, &str)]) {
        for (from, to) in mapping {
            if from == to {
                continue;
            }
            let Some(idx) = self.column_index(from) else {
                continue;
            };
            if self.has_column(to) {
                debug!(
                    "{}: keeping existing '{}' column, ignoring '{}'",
                    self.name, to, from
                );
                continue;
            }
            self.columns[idx] = to.to_string();
        }
    }
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::DateTime(_) | Data::DateTimeIso(_) => cell
            .as_date()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| cell.to_string()),
        other => other.to_string().trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_headers_are_lowercased_and_rows_padded() {
        let csv = "Date,Amount Num.,Account Name\n2020-01-01,\"1,200.00\",Cash\n2020-01-02,5\n";
        let frame = RawFrame::from_csv_bytes("t.csv", csv.as_bytes()).unwrap();
        assert_eq!(frame.columns(), &["date", "amount num.", "account name"]);
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.cell(0, 1), Some("1,200.00"));
        assert_eq!(frame.cell(1, 2), None);
    }

    #[test]
    fn test_rename_columns() {
        let mut frame = RawFrame::new(
            "t",
            vec!["Account Name".into(), "Amount Num.".into()],
            vec![vec!["Cash".into(), "1".into()]],
        );
        frame.rename_columns(&[
            ("account name".to_string(), COL_ACCOUNT),
            ("amount num.".to_string(), COL_AMOUNT),
            ("missing".to_string(), COL_DATE),
        ]);
        assert_eq!(frame.columns(), &["account", "amount"]);
    }

    #[test]
    fn test_inline_base64_and_data_url() {
        let csv = "date,amount,account\n2020-01-01,3,Cash\n";
        let encoded = STANDARD.encode(csv);
        let frame = RawFrame::read(&Source::Inline {
            filename: "trans.csv".to_string(),
            content: format!("data:text/csv;base64,{}", encoded),
        })
        .unwrap();
        assert_eq!(frame.cell(0, 2), Some("Cash"));

        let bare = decode_inline(&encoded).unwrap();
        assert_eq!(bare, csv.as_bytes());
        assert!(decode_inline("not base64!!").is_err());
    }

    #[test]
    fn test_url_filename_and_format_detection() {
        assert_eq!(filename_from_url("https://x.org/data/trans.xlsx?raw=1"), "trans.xlsx");
        assert!(is_spreadsheet("trans.XLSX"));
        assert!(!is_spreadsheet("trans.csv"));
        assert!(RawFrame::read(&Source::Url("https://x.org/a.csv".into())).is_err());
    }

    #[test]
    fn test_blank_rows_are_dropped() {
        let csv = "date,amount\n,\n2020-01-01,1\n";
        let frame = RawFrame::from_csv_bytes("t.csv", csv.as_bytes()).unwrap();
        assert_eq!(frame.len(), 1);
    }
}
