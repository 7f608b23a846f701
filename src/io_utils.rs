//! I/O utilities for CSV reading, writing, encoding, and delimiter resolution.
//!
//! All CSV I/O in crm-import flows through this module. It provides:
//!
//! - **Delimiter resolution**: explicit override, otherwise sniffed from the
//!   header line among `,` `;` tab and `|`.
//! - **Encoding**: input decoding via `encoding_rs`, defaulting to UTF-8, with
//!   the UTF-8 byte-order mark stripped.
//! - **Reader/writer construction**: `open_csv_reader` and `open_csv_writer`.
//! - **stdout**: the `-` path convention routes output through standard out.
//! - **Quoting**: CSV output uses `QuoteStyle::Always` so reports round-trip.

use std::{
    fs::File,
    io::{BufWriter, Read, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
const SNIFF_CANDIDATES: &[u8] = b",;\t|";
pub const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn starts_with_bom(bytes: &[u8]) -> bool {
    bytes.starts_with(UTF8_BOM)
}

/// Picks the candidate delimiter occurring most often on the first line.
///
/// Quoted sections are ignored; ties and lines without any candidate fall
/// back to a comma.
pub fn sniff_delimiter(bytes: &[u8]) -> u8 {
    let first_line = bytes
        .split(|b| *b == b'\n')
        .next()
        .unwrap_or_default();
    let mut counts = [0usize; SNIFF_CANDIDATES.len()];
    let mut in_quotes = false;
    for byte in first_line {
        if *byte == b'"' {
            in_quotes = !in_quotes;
            continue;
        }
        if in_quotes {
            continue;
        }
        if let Some(idx) = SNIFF_CANDIDATES.iter().position(|c| c == byte) {
            counts[idx] += 1;
        }
    }
    let mut best = DEFAULT_CSV_DELIMITER;
    let mut best_count = 0usize;
    for (candidate, count) in SNIFF_CANDIDATES.iter().zip(counts) {
        if count > best_count {
            best = *candidate;
            best_count = count;
        }
    }
    best
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8, has_headers: bool) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(has_headers)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

pub fn open_csv_writer(path: Option<&Path>, delimiter: u8) -> Result<csv::Writer<Box<dyn Write>>> {
    let base: Box<dyn Write> = match path {
        Some(p) if !is_dash(p) => Box::new(BufWriter::new(
            File::create(p).with_context(|| format!("Creating output file {p:?}"))?,
        )),
        _ => Box::new(std::io::stdout()),
    };
    Ok(csv_writer(base, delimiter))
}

pub fn csv_writer<W: Write>(writer: W, delimiter: u8) -> csv::Writer<W> {
    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Always)
        .double_quote(true);
    builder.from_writer(writer)
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(record: &csv::ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}
