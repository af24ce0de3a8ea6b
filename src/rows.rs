//! Row parsing over decoded export text.
//!
//! Rows are positional: values stay aligned to the header record and
//! are addressed by resolved column index, never by per-row maps.
//! Lines that fail to parse become warnings, all-blank records are
//! dropped, and quoted fields may carry delimiters and newlines.

use std::io::{BufRead, BufReader, Read};

use anyhow::{Context, Result};
use log::debug;

use crate::io_utils;

/// One parsed data line, 1-based source line attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    pub line: usize,
    pub fields: Vec<String>,
}

impl RawRow {
    pub fn get(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParsedRows {
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
    pub warnings: Vec<String>,
}

/// Reads header and data rows from an already-decoding stream.
/// `skip_rows` preamble lines are consumed before the CSV state
/// machine starts, so a stray quote in a title line cannot corrupt
/// the parse.
pub fn parse_rows<R>(reader: R, delimiter: u8, skip_rows: usize) -> Result<ParsedRows>
where
    R: Read,
{
    let mut buffered = BufReader::new(reader);
    let mut discard = String::new();
    for _ in 0..skip_rows {
        discard.clear();
        buffered
            .read_line(&mut discard)
            .context("Skipping preamble lines")?;
    }

    let mut csv_reader = io_utils::open_csv_reader(buffered, delimiter, true);
    let headers: Vec<String> = csv_reader
        .headers()
        .context("Reading header row")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut parsed = ParsedRows {
        headers,
        ..ParsedRows::default()
    };
    let mut fallback_line = 1usize;
    for result in csv_reader.records() {
        fallback_line += 1;
        match result {
            Ok(record) => {
                let line = record
                    .position()
                    .map(|p| p.line() as usize)
                    .unwrap_or(fallback_line);
                let fields: Vec<String> = record.iter().map(|f| f.to_string()).collect();
                if fields.iter().all(|f| f.trim().is_empty()) {
                    debug!("Dropping blank record at line {}", skip_rows + line);
                    continue;
                }
                parsed.rows.push(RawRow {
                    line: skip_rows + line,
                    fields,
                });
            }
            Err(err) => {
                let line = err
                    .position()
                    .map(|p| p.line() as usize)
                    .unwrap_or(fallback_line);
                parsed
                    .warnings
                    .push(format!("Line {}: {err}", skip_rows + line));
            }
        }
    }
    debug!(
        "Parsed {} rows, {} warnings",
        parsed.rows.len(),
        parsed.warnings.len()
    );
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str, delimiter: u8, skip_rows: usize) -> ParsedRows {
        parse_rows(text.as_bytes(), delimiter, skip_rows).expect("parse")
    }

    #[test]
    fn quoted_fields_keep_delimiters_and_newlines() {
        let text = "Id;Verdipapir;Beløp\n1;\"Orkla; ASA\";42\n2;\"Two\nlines\";7\n";
        let parsed = parse(text, b';', 0);
        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.rows[0].get(1), Some("Orkla; ASA"));
        assert_eq!(parsed.rows[1].get(1), Some("Two\nlines"));
    }

    #[test]
    fn ragged_rows_become_warnings_and_are_skipped() {
        let text = "Id\tBeløp\n1\t42\n2\t7\textra\n3\t9\n";
        let parsed = parse(text, b'\t', 0);
        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.warnings.len(), 1);
        assert!(parsed.warnings[0].starts_with("Line 3:"));
    }

    #[test]
    fn preamble_skip_offsets_line_numbers() {
        let text = "Nordnet eksport \"2024\"\nId;Beløp\n1;42\n";
        let parsed = parse(text, b';', 1);
        assert_eq!(parsed.headers, vec!["Id", "Beløp"]);
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.rows[0].line, 3);
    }

    #[test]
    fn blank_records_are_dropped() {
        let text = "Id;Beløp\n1;42\n;\n\n2;7\n";
        let parsed = parse(text, b';', 0);
        assert_eq!(parsed.rows.len(), 2);
        assert!(parsed.warnings.is_empty());
    }

    #[test]
    fn header_whitespace_is_trimmed() {
        let text = " Id ;\tBeløp\n1;42\n";
        let parsed = parse(text, b';', 0);
        assert_eq!(parsed.headers, vec!["Id", "Beløp"]);
    }
}
