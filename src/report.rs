//! Run reports: the `ImportResult` accumulator, the pre-flight
//! `FileValidation` summary, and the CSV/JSON writers around them.

use std::{fs::File, io::Write, path::Path};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::{io_utils, model::TransformedTransaction};

/// Everything one run produced. `processed` keeps every mapped row,
/// persisted or not, so callers can render a full review screen.
#[derive(Debug, Clone, Serialize)]
pub struct ImportResult {
    pub batch_id: Uuid,
    pub source_checksum: String,
    pub parsed_rows: usize,
    pub transformed_rows: usize,
    pub skipped_rows: usize,
    pub created_accounts: usize,
    pub created_securities: usize,
    pub created_transactions: usize,
    pub updated_transactions: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub processed: Vec<TransformedTransaction>,
}

impl ImportResult {
    pub fn new(batch_id: Uuid, source_checksum: String) -> Self {
        Self {
            batch_id,
            source_checksum,
            parsed_rows: 0,
            transformed_rows: 0,
            skipped_rows: 0,
            created_accounts: 0,
            created_securities: 0,
            created_transactions: 0,
            updated_transactions: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            processed: Vec::new(),
        }
    }

    /// True only when the error list is empty; warnings do not count.
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("Creating report file {path:?}"))?;
        serde_json::to_writer_pretty(file, self).context("Writing report JSON")
    }
}

/// Pre-flight answer: what the file looks like and whether an import
/// would get past the structural gate.
#[derive(Debug, Clone, Serialize)]
pub struct FileValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub encoding: String,
    pub delimiter: char,
    pub headers: Vec<String>,
    pub data_rows: usize,
}

const EXPORT_HEADERS: [&str; 18] = [
    "line",
    "external_id",
    "booking_date",
    "trade_date",
    "settlement_date",
    "portfolio",
    "account",
    "type",
    "security",
    "isin",
    "quantity",
    "price",
    "currency",
    "amount",
    "fees",
    "note",
    "errors",
    "warnings",
];

fn date_field(value: Option<NaiveDate>) -> String {
    value.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default()
}

fn decimal_field(value: Option<Decimal>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Re-exports transformed rows as canonical CSV. Pure formatting; the
/// caller decides what subset to hand in and where the bytes go.
pub fn export_csv<W>(transactions: &[TransformedTransaction], sink: W, delimiter: u8) -> Result<()>
where
    W: Write,
{
    let mut writer = io_utils::open_export_writer(sink, delimiter);
    writer
        .write_record(EXPORT_HEADERS)
        .context("Writing export header")?;
    for tx in transactions {
        writer
            .write_record([
                tx.line.to_string(),
                tx.external_id.clone(),
                date_field(tx.booking_date),
                date_field(tx.trade_date),
                date_field(tx.settlement_date),
                tx.portfolio.clone(),
                tx.account_name.clone(),
                tx.kind.as_str().to_string(),
                tx.security_name.clone().unwrap_or_default(),
                tx.isin.clone().unwrap_or_default(),
                decimal_field(tx.quantity),
                decimal_field(tx.price),
                tx.currency.clone().unwrap_or_default(),
                decimal_field(tx.amount),
                decimal_field(tx.fees),
                tx.note.clone().unwrap_or_default(),
                tx.errors.join("; "),
                tx.warnings.join("; "),
            ])
            .with_context(|| format!("Writing export row for line {}", tx.line))?;
    }
    writer.flush().context("Flushing export")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TransactionKind;
    use std::collections::BTreeMap;
    use std::str::FromStr;

    fn sample() -> TransformedTransaction {
        TransformedTransaction {
            line: 2,
            external_id: "860271458".to_string(),
            booking_date: NaiveDate::from_ymd_opt(2024, 5, 6),
            trade_date: NaiveDate::from_ymd_opt(2024, 5, 3),
            settlement_date: None,
            portfolio: "551234567".to_string(),
            account_name: "Nordnet 4567".to_string(),
            raw_type: "KJØPT".to_string(),
            kind: TransactionKind::Buy,
            security_name: Some("Orkla ASA".to_string()),
            isin: Some("NO0010081235".to_string()),
            quantity: Some(Decimal::from_str("66").unwrap()),
            price: Some(Decimal::from_str("434.94").unwrap()),
            currency: Some("NOK".to_string()),
            amount: Some(Decimal::from_str("-28706.04").unwrap()),
            fees: Some(Decimal::from_str("29.00").unwrap()),
            note: None,
            needs_security: true,
            extras: BTreeMap::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    #[test]
    fn export_quotes_every_field() {
        let mut sink = Vec::new();
        export_csv(&[sample()], &mut sink, b',').unwrap();
        let text = String::from_utf8(sink).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("\"line\",\"external_id\""));
        let row = lines.next().unwrap();
        assert!(row.contains("\"BUY\""));
        assert!(row.contains("\"-28706.04\""));
        assert!(row.contains("\"2024-05-06\""));
    }

    #[test]
    fn report_saves_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let mut result = ImportResult::new(Uuid::new_v4(), "abc123".to_string());
        result.parsed_rows = 2;
        result.processed.push(sample());
        result.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"source_checksum\": \"abc123\""));
        assert!(text.contains("\"parsed_rows\": 2"));
        assert!(text.contains("\"NO0010081235\""));
    }

    #[test]
    fn success_tracks_the_error_list() {
        let mut result = ImportResult::new(Uuid::new_v4(), String::new());
        assert!(result.success());
        result.warnings.push("note".to_string());
        assert!(result.success());
        result.errors.push("broken".to_string());
        assert!(!result.success());
    }
}
