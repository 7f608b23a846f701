//! Upload parsing: CSV and spreadsheet files into one tabular shape.
//!
//! [`parse`] dispatches on the file extension. Both the CSV path and the
//! spreadsheet path converge on [`ParsedFile`], so later stages never know
//! which format was uploaded. Format and size are checked before a single
//! byte of content is read.

use std::{
    collections::BTreeMap,
    fmt,
    fs::{self, File},
    io::{BufRead, BufReader, Cursor, Read, Seek},
    path::{Path, PathBuf},
};

use calamine::{Data, Reader, Sheets, open_workbook_from_rs};
use chrono::{Days, NaiveDate, NaiveTime};
use encoding_rs::{Encoding, UTF_8};
use log::debug;
use serde::Serialize;
use thiserror::Error;

use crate::{config::ImportSettings, data::format_number, io_utils};

/// Upload ceiling: 25 MiB.
pub const MAX_FILE_BYTES: u64 = 25 * 1024 * 1024;

/// One data row keyed by raw header.
pub type Row = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Unsupported file type '{extension}'; expected .csv, .xlsx or .xls")]
    UnsupportedFormat { extension: String },
    #[error("File is {size} bytes, exceeding the {limit} byte upload limit")]
    TooLarge { size: u64, limit: u64 },
    #[error("File has no header row")]
    MissingHeaders,
    #[error("File has a header row but no data rows")]
    NoDataRows,
    #[error("Row {row} could not be decoded as {encoding}")]
    Encoding { row: usize, encoding: &'static str },
    #[error("Reading {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("Unreadable spreadsheet: {0}")]
    Spreadsheet(String),
}

/// Coarse grouping of [`ParseError`] used to decide how a rejection is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    Format,
    Size,
    Structure,
    Read,
}

impl ParseError {
    pub fn kind(&self) -> ParseErrorKind {
        match self {
            ParseError::UnsupportedFormat { .. } => ParseErrorKind::Format,
            ParseError::TooLarge { .. } => ParseErrorKind::Size,
            ParseError::MissingHeaders | ParseError::NoDataRows => ParseErrorKind::Structure,
            ParseError::Encoding { .. }
            | ParseError::Io { .. }
            | ParseError::Csv(_)
            | ParseError::Spreadsheet(_) => ParseErrorKind::Read,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Csv,
    Xlsx,
    Xls,
}

impl SourceFormat {
    pub fn from_name(name: &str) -> Result<Self, ParseError> {
        let extension = Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match extension.as_str() {
            "csv" => Ok(SourceFormat::Csv),
            "xlsx" => Ok(SourceFormat::Xlsx),
            "xls" => Ok(SourceFormat::Xls),
            _ => Err(ParseError::UnsupportedFormat { extension }),
        }
    }

    pub fn is_spreadsheet(&self) -> bool {
        matches!(self, SourceFormat::Xlsx | SourceFormat::Xls)
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            SourceFormat::Csv => "csv",
            SourceFormat::Xlsx => "xlsx",
            SourceFormat::Xls => "xls",
        };
        write!(f, "{token}")
    }
}

#[derive(Debug, Clone)]
pub struct ParseOptions {
    pub max_file_bytes: u64,
    /// CSV only; sniffed from the header line when absent.
    pub delimiter: Option<u8>,
    /// CSV only.
    pub encoding: &'static Encoding,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            max_file_bytes: MAX_FILE_BYTES,
            delimiter: None,
            encoding: UTF_8,
        }
    }
}

impl ParseOptions {
    pub fn from_settings(settings: &ImportSettings) -> Self {
        Self {
            max_file_bytes: settings.max_file_bytes,
            ..Self::default()
        }
    }
}

/// Uniform view of an uploaded file. Built once, read-only afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct ParsedFile {
    /// Raw header cells in file order, trimmed, duplicates preserved.
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
    pub total_rows: usize,
    pub file_name: String,
    pub format: SourceFormat,
}

impl ParsedFile {
    /// Assembles a parsed file from raw header and record cells.
    ///
    /// Records whose cells are all blank are dropped; short records read as
    /// empty cells and surplus cells are ignored. When a header repeats, the
    /// rightmost column wins inside each row map.
    pub fn from_records(
        file_name: impl Into<String>,
        format: SourceFormat,
        headers: Vec<String>,
        records: Vec<Vec<String>>,
    ) -> Result<Self, ParseError> {
        let headers = headers
            .into_iter()
            .map(|h| h.trim().to_string())
            .collect::<Vec<_>>();
        if headers.iter().all(|h| h.is_empty()) {
            return Err(ParseError::MissingHeaders);
        }
        let rows = records
            .into_iter()
            .filter(|record| record.iter().any(|cell| !cell.trim().is_empty()))
            .map(|record| {
                headers
                    .iter()
                    .enumerate()
                    .map(|(idx, header)| {
                        let value = record.get(idx).cloned().unwrap_or_default();
                        (header.clone(), value)
                    })
                    .collect::<Row>()
            })
            .collect::<Vec<_>>();
        if rows.is_empty() {
            return Err(ParseError::NoDataRows);
        }
        Ok(Self {
            total_rows: rows.len(),
            headers,
            rows,
            file_name: file_name.into(),
            format,
        })
    }

    pub fn value(&self, row: usize, header: &str) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|r| r.get(header))
            .map(String::as_str)
    }
}

fn ensure_size(size: u64, limit: u64) -> Result<(), ParseError> {
    if size > limit {
        return Err(ParseError::TooLarge { size, limit });
    }
    Ok(())
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ParseError + '_ {
    move |source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Parses an uploaded file from disk.
pub fn parse(path: &Path, options: &ParseOptions) -> Result<ParsedFile, ParseError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let format = SourceFormat::from_name(&file_name)?;
    let size = fs::metadata(path).map_err(io_error(path))?.len();
    ensure_size(size, options.max_file_bytes)?;
    debug!("Parsing {file_name} ({size} bytes) as {format}");

    let file = File::open(path).map_err(io_error(path))?;
    let (headers, records) = if format.is_spreadsheet() {
        read_workbook(BufReader::new(file), format)?
    } else {
        read_csv(BufReader::new(file), options)?
    };
    ParsedFile::from_records(file_name, format, headers, records)
}

/// Parses an in-memory upload; `file_name` only drives format detection.
pub fn parse_bytes(
    file_name: &str,
    bytes: &[u8],
    options: &ParseOptions,
) -> Result<ParsedFile, ParseError> {
    let format = SourceFormat::from_name(file_name)?;
    ensure_size(bytes.len() as u64, options.max_file_bytes)?;
    let (headers, records) = if format.is_spreadsheet() {
        read_workbook(Cursor::new(bytes), format)?
    } else {
        read_csv(bytes, options)?
    };
    ParsedFile::from_records(file_name, format, headers, records)
}

type RawTable = (Vec<String>, Vec<Vec<String>>);

fn read_csv<R: BufRead>(mut reader: R, options: &ParseOptions) -> Result<RawTable, ParseError> {
    let read_err = |source: std::io::Error| ParseError::Io {
        path: PathBuf::from("<csv>"),
        source,
    };
    let has_bom = io_utils::starts_with_bom(reader.fill_buf().map_err(read_err)?);
    if has_bom {
        reader.consume(io_utils::UTF8_BOM.len());
    }
    let delimiter = match options.delimiter {
        Some(delimiter) => delimiter,
        None => io_utils::sniff_delimiter(reader.fill_buf().map_err(read_err)?),
    };

    let encoding = options.encoding;
    let mut csv_reader = io_utils::open_csv_reader(reader, delimiter, true);
    let header_record = csv_reader.byte_headers()?.clone();
    let headers = io_utils::decode_record(&header_record, encoding).map_err(|_| {
        ParseError::Encoding {
            row: 1,
            encoding: encoding.name(),
        }
    })?;

    let mut records = Vec::new();
    for (idx, record) in csv_reader.byte_records().enumerate() {
        let record = record?;
        let decoded =
            io_utils::decode_record(&record, encoding).map_err(|_| ParseError::Encoding {
                row: idx + 2,
                encoding: encoding.name(),
            })?;
        records.push(decoded);
    }
    Ok((headers, records))
}

fn spreadsheet_error(err: impl fmt::Display) -> ParseError {
    ParseError::Spreadsheet(err.to_string())
}

fn read_workbook<RS: Read + Seek>(reader: RS, format: SourceFormat) -> Result<RawTable, ParseError> {
    let mut workbook: Sheets<RS> = match format {
        SourceFormat::Xls => Sheets::Xls(open_workbook_from_rs(reader).map_err(spreadsheet_error)?),
        SourceFormat::Xlsx | SourceFormat::Csv => {
            Sheets::Xlsx(open_workbook_from_rs(reader).map_err(spreadsheet_error)?)
        }
    };
    let range = match workbook.worksheet_range_at(0) {
        Some(range) => range.map_err(spreadsheet_error)?,
        None => return Err(ParseError::MissingHeaders),
    };
    // The range begins at the first used cell, not at A1.
    let (first_row, first_column) = range.start().unwrap_or_default();
    if first_row > 0 {
        return Err(ParseError::MissingHeaders);
    }
    let leading_blanks = first_column as usize;
    let to_cells = |row: &[Data]| {
        std::iter::repeat_n(String::new(), leading_blanks)
            .chain(row.iter().map(cell_to_string))
            .collect::<Vec<_>>()
    };
    let mut rows = range.rows();
    let headers = match rows.next() {
        Some(row) => to_cells(row),
        None => return Err(ParseError::MissingHeaders),
    };
    let records = rows.map(to_cells).collect();
    Ok((headers, records))
}

/// Renders a spreadsheet cell the way it reads on screen.
///
/// Formula cells arrive as their cached result and rich text as the
/// concatenation of its runs, so neither needs special handling here.
fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(n) => n.to_string(),
        Data::Float(f) => format_number(*f),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) if dt.is_duration() => format_number(dt.as_f64()),
        Data::DateTime(dt) => excel_serial_to_string(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(err) => err.to_string(),
    }
}

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Converts an Excel serial date (days since 1899-12-30) to ISO text.
fn excel_serial_to_string(serial: f64) -> String {
    let Some(epoch) = NaiveDate::from_ymd_opt(1899, 12, 30) else {
        return format_number(serial);
    };
    if !serial.is_finite() || serial < 0.0 {
        return format_number(serial);
    }
    let mut days = serial.trunc() as u64;
    let mut seconds = (serial.fract() * SECONDS_PER_DAY).round() as u32;
    if seconds >= SECONDS_PER_DAY as u32 {
        days += 1;
        seconds = 0;
    }
    let Some(date) = epoch.checked_add_days(Days::new(days)) else {
        return format_number(serial);
    };
    if seconds == 0 {
        return date.format("%Y-%m-%d").to_string();
    }
    match NaiveTime::from_num_seconds_from_midnight_opt(seconds, 0) {
        Some(time) => date.and_time(time).format("%Y-%m-%d %H:%M:%S").to_string(),
        None => date.format("%Y-%m-%d").to_string(),
    }
}
