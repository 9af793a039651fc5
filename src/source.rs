//! Source spreadsheet discovery and loading.
//!
//! Every spreadsheet in the input directory becomes one [`SourceTable`] keyed
//! by its lowercased file stem. Headers are lowercased on load so that the
//! matcher compares spellings case-insensitively; cell values are left
//! untouched apart from mapping missing-value tokens to `None`.
//!
//! A spreadsheet that cannot be read is skipped and reported in
//! [`LoadReport::skipped`] unless [`LoadOptions::strict`] is set.

use std::{
    collections::{BTreeMap, HashSet},
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow, ensure};
use calamine::{Data, ExcelDateTime, Reader, open_workbook_auto};
use chrono::NaiveTime;
use encoding_rs::{Encoding, UTF_8};
use log::{debug, warn};
use thiserror::Error;

use crate::{data::normalize_raw, io_utils};

const WORKBOOK_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];
const DELIMITED_EXTENSIONS: &[&str] = &["csv", "tsv"];

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Reading source directory {path:?}: {source}")]
    Directory {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Reading source {path:?}: {reason}")]
    Unreadable { path: PathBuf, reason: String },
}

/// One loaded spreadsheet. A `None` cell is missing.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceTable {
    pub name: String,
    pub path: PathBuf,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl SourceTable {
    /// Builds a table from raw parts, lowercasing the headers and padding
    /// short rows with missing cells.
    pub fn new(name: &str, headers: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        let headers = normalize_headers(headers);
        let width = headers.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                if row.len() < width {
                    row.resize(width, None);
                }
                row
            })
            .collect();
        Self {
            name: name.to_lowercase(),
            path: PathBuf::new(),
            headers,
            rows,
        }
    }

    /// Convenience for building in-memory tables from string literals; empty
    /// strings and missing-value tokens become `None`.
    pub fn from_strs(name: &str, headers: &[&str], rows: &[&[&str]]) -> Self {
        let headers = headers.iter().map(|h| h.to_string()).collect();
        let rows = rows
            .iter()
            .map(|row| row.iter().map(|cell| normalize_raw(cell.to_string())).collect())
            .collect();
        Self::new(name, headers, rows)
    }

    pub fn header_set(&self) -> HashSet<&str> {
        self.headers.iter().map(String::as_str).collect()
    }

    pub fn column_index(&self, header: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == header)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

pub type SourceTables = BTreeMap<String, SourceTable>;

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub delimiter: Option<u8>,
    pub encoding: &'static Encoding,
    pub strict: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            delimiter: None,
            encoding: UTF_8,
            strict: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedSource {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub tables: SourceTables,
    pub skipped: Vec<SkippedSource>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceFormat {
    Delimited,
    Workbook,
}

fn source_format(path: &Path) -> Option<SourceFormat> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if DELIMITED_EXTENSIONS.contains(&ext.as_str()) {
        Some(SourceFormat::Delimited)
    } else if WORKBOOK_EXTENSIONS.contains(&ext.as_str()) {
        Some(SourceFormat::Workbook)
    } else {
        None
    }
}

/// Spreadsheet files directly inside `dir`, sorted by file name.
pub fn discover_sources(dir: &Path) -> Result<Vec<PathBuf>, SourceError> {
    let directory_error = |source| SourceError::Directory {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(directory_error)? {
        let path = entry.map_err(directory_error)?.path();
        if path.is_file() && source_format(&path).is_some() {
            paths.push(path);
        }
    }
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(paths)
}

pub fn load_sources(dir: &Path, options: &LoadOptions) -> Result<LoadReport, SourceError> {
    let mut report = LoadReport::default();
    for path in discover_sources(dir)? {
        let table = match read_source(&path, options) {
            Ok(table) => table,
            Err(err) if !options.strict => {
                warn!("{err}; skipping it");
                report.skipped.push(SkippedSource {
                    path,
                    reason: err.to_string(),
                });
                continue;
            }
            Err(err) => return Err(err),
        };
        if report.tables.contains_key(&table.name) {
            let reason = format!("another spreadsheet already provides '{}'", table.name);
            warn!("Skipping {path:?}: {reason}");
            report.skipped.push(SkippedSource { path, reason });
            continue;
        }
        debug!(
            "Loaded '{}' with {} column(s) and {} row(s)",
            table.name,
            table.headers.len(),
            table.row_count()
        );
        report.tables.insert(table.name.clone(), table);
    }
    Ok(report)
}

pub fn read_source(path: &Path, options: &LoadOptions) -> Result<SourceTable, SourceError> {
    let name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_lowercase)
        .ok_or_else(|| SourceError::Unreadable {
            path: path.to_path_buf(),
            reason: "file name is not valid UTF-8".to_string(),
        })?;
    let parsed = match source_format(path) {
        Some(SourceFormat::Delimited) => read_delimited(path, options),
        Some(SourceFormat::Workbook) => read_workbook(path),
        None => Err(anyhow!("unsupported file extension")),
    };
    let (headers, rows) = parsed.map_err(|err| SourceError::Unreadable {
        path: path.to_path_buf(),
        reason: format!("{err:#}"),
    })?;
    let mut table = SourceTable::new(&name, headers, rows);
    table.path = path.to_path_buf();
    Ok(table)
}

type RawTable = (Vec<String>, Vec<Vec<Option<String>>>);

fn read_delimited(path: &Path, options: &LoadOptions) -> Result<RawTable> {
    let delimiter = io_utils::resolve_input_delimiter(path, options.delimiter);
    let mut reader = io_utils::open_csv_reader_from_path(path, delimiter, true)?;
    let headers = io_utils::reader_headers(&mut reader, options.encoding)?;
    let mut rows = Vec::new();
    for (row_idx, record) in reader.byte_records().enumerate() {
        let record = record.with_context(|| format!("Reading row {}", row_idx + 2))?;
        let decoded = io_utils::decode_record(&record, options.encoding)
            .with_context(|| format!("Decoding row {}", row_idx + 2))?;
        ensure!(
            decoded.len() <= headers.len(),
            "Row {} has {} field(s) but the header has {}",
            row_idx + 2,
            decoded.len(),
            headers.len()
        );
        rows.push(decoded.into_iter().map(normalize_raw).collect());
    }
    Ok((headers, rows))
}

fn read_workbook(path: &Path) -> Result<RawTable> {
    let mut workbook = open_workbook_auto(path).context("Opening workbook")?;
    let sheet_name = workbook
        .sheet_names()
        .first()
        .context("Workbook has no sheets")?
        .clone();
    let range = workbook
        .worksheet_range(&sheet_name)
        .with_context(|| format!("Reading sheet '{sheet_name}'"))?;

    let mut rows = range.rows();
    let headers = rows
        .next()
        .map(|row| {
            row.iter()
                .map(|cell| cell_string(cell).unwrap_or_default())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let rows = rows
        .filter(|row| row.iter().any(|cell| cell_string(cell).is_some()))
        .map(|row| row.iter().map(cell_string).collect())
        .collect();
    Ok((headers, rows))
}

fn cell_string(cell: &Data) -> Option<String> {
    let text = match cell {
        Data::Empty => return None,
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                (*f as i64).to_string()
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => excel_datetime_string(dt),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        other => other.to_string(),
    };
    normalize_raw(text)
}

/// Dates as `%Y-%m-%d`, times of day as `%H:%M:%S`, both when the serial
/// carries a date and a time. Durations render as elapsed `H:MM:SS`.
fn excel_datetime_string(dt: &ExcelDateTime) -> String {
    if dt.is_duration() {
        if let Some(elapsed) = dt.as_duration() {
            let secs = elapsed.num_seconds();
            return format!("{}:{:02}:{:02}", secs / 3600, secs % 3600 / 60, secs % 60);
        }
    }
    let serial = dt.as_f64();
    let Some(datetime) = dt.as_datetime() else {
        return serial.to_string();
    };
    let has_date = serial.trunc() != 0.0;
    let has_time = datetime.time() != NaiveTime::MIN;
    let pattern = match (has_date, has_time) {
        (true, false) => "%Y-%m-%d",
        (false, _) => "%H:%M:%S",
        (true, true) => "%Y-%m-%d %H:%M:%S",
    };
    datetime.format(pattern).to_string()
}

fn normalize_headers(headers: Vec<String>) -> Vec<String> {
    headers
        .into_iter()
        .enumerate()
        .map(|(idx, header)| {
            let header = if idx == 0 {
                header.trim_start_matches('\u{feff}').to_string()
            } else {
                header
            };
            header.to_lowercase()
        })
        .collect()
}
