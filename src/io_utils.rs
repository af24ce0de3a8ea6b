//! I/O utilities for loading and decoding institution export files.
//!
//! All file intake flows through this module. It provides:
//!
//! - **Input contract**: extension allow-list, 50MB size cap, and
//!   empty-file rejection, reported as structured violations rather
//!   than errors so a bad file never aborts a run.
//! - **Encoding**: label resolution for configured overrides and
//!   streaming decode via `encoding_rs_io`, with BOMs taking
//!   precedence over the detected or configured encoding.
//! - **Reader/writer construction**: `open_csv_reader` over any
//!   decoded stream, and the export writer used for re-serializing
//!   transformed rows.

use std::{fs, io::Read, path::Path};

use anyhow::{Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::Encoding;
use encoding_rs_io::{DecodeReaderBytes, DecodeReaderBytesBuilder};

/// Hard cap on accepted input files.
pub const MAX_IMPORT_BYTES: usize = 50 * 1024 * 1024;
pub const DEFAULT_EXPORT_DELIMITER: u8 = b',';

const ALLOWED_EXTENSIONS: &[&str] = &["csv", "txt"];

pub fn resolve_encoding(label: &str) -> Result<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| anyhow!("Unknown encoding '{label}'"))
}

/// Checks the input-file contract. Violations are fatal to the file,
/// not to the run, so they come back as a list instead of an `Err`.
pub fn input_contract_violations(filename: &str, byte_len: usize) -> Vec<String> {
    let mut violations = Vec::new();
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();
    if !ALLOWED_EXTENSIONS
        .iter()
        .any(|allowed| extension.eq_ignore_ascii_case(allowed))
    {
        violations.push(format!(
            "Unsupported file extension '{extension}' for '{filename}' (expected .csv or .txt)"
        ));
    }
    if byte_len == 0 {
        violations.push(format!("File '{filename}' is empty"));
    } else if byte_len > MAX_IMPORT_BYTES {
        violations.push(format!(
            "File '{filename}' is {byte_len} bytes, above the {MAX_IMPORT_BYTES} byte limit"
        ));
    }
    violations
}

pub fn read_input(path: &Path) -> std::io::Result<Vec<u8>> {
    fs::read(path)
}

/// Streaming decode of raw export bytes. A BOM, when present, wins
/// over `encoding`; otherwise the bytes decode as `encoding` with
/// malformed sequences replaced rather than erroring, since encoding
/// selection already happened upstream.
pub fn decoded_reader<'a>(
    bytes: &'a [u8],
    encoding: &'static Encoding,
) -> DecodeReaderBytes<&'a [u8], Vec<u8>> {
    DecodeReaderBytesBuilder::new()
        .encoding(Some(encoding))
        .bom_override(true)
        .build(bytes)
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
        .flexible(false);
    builder.from_reader(reader)
}

pub fn open_export_writer<W>(sink: W, delimiter: u8) -> csv::Writer<W>
where
    W: std::io::Write,
{
    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Always)
        .double_quote(true);
    builder.from_writer(sink)
}
