//! Canonical domain model shared across the pipeline stages.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Closed set of normalized transaction kinds. Institution-specific
/// labels resolve here through the profile's label table or the
/// keyword fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Buy,
    Sell,
    Dividend,
    Interest,
    Fee,
    Tax,
    Deposit,
    Withdrawal,
    TransferIn,
    TransferOut,
    Split,
    Merger,
    Spinoff,
    Reinvestment,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionKind::Buy => "BUY",
            TransactionKind::Sell => "SELL",
            TransactionKind::Dividend => "DIVIDEND",
            TransactionKind::Interest => "INTEREST",
            TransactionKind::Fee => "FEE",
            TransactionKind::Tax => "TAX",
            TransactionKind::Deposit => "DEPOSIT",
            TransactionKind::Withdrawal => "WITHDRAWAL",
            TransactionKind::TransferIn => "TRANSFER_IN",
            TransactionKind::TransferOut => "TRANSFER_OUT",
            TransactionKind::Split => "SPLIT",
            TransactionKind::Merger => "MERGER",
            TransactionKind::Spinoff => "SPINOFF",
            TransactionKind::Reinvestment => "REINVESTMENT",
        }
    }

    /// Kinds that reference a tradable instrument and therefore need a
    /// resolved security before persisting.
    pub fn needs_security(self) -> bool {
        matches!(
            self,
            TransactionKind::Buy
                | TransactionKind::Sell
                | TransactionKind::Dividend
                | TransactionKind::Split
                | TransactionKind::Merger
                | TransactionKind::Spinoff
        )
    }

    /// Best-effort resolution of an unmapped label by keyword. Checks
    /// the more specific patterns first: reinvested dividends carry a
    /// dividend keyword too, and transfers embed a direction word.
    pub fn from_keywords(label: &str) -> Option<Self> {
        let upper = label.to_uppercase();
        let has = |needle: &str| upper.contains(needle);
        if has("REINVEST") {
            return Some(TransactionKind::Reinvestment);
        }
        if has("OVERFØR") || has("TRANSFER") {
            return if has("UT") || has("OUT") {
                Some(TransactionKind::TransferOut)
            } else {
                Some(TransactionKind::TransferIn)
            };
        }
        if has("SPLIT") {
            return Some(TransactionKind::Split);
        }
        if has("FUSJON") || has("MERGER") {
            return Some(TransactionKind::Merger);
        }
        if has("FISJON") || has("SPINOFF") || has("SPIN-OFF") {
            return Some(TransactionKind::Spinoff);
        }
        if has("SKATT") || has("TAX") {
            return Some(TransactionKind::Tax);
        }
        if has("UTBYTTE") || has("DIVIDEND") {
            return Some(TransactionKind::Dividend);
        }
        if has("RENTE") || has("INTEREST") {
            return Some(TransactionKind::Interest);
        }
        if has("INNSKUDD") || has("DEPOSIT") {
            return Some(TransactionKind::Deposit);
        }
        if has("UTTAK") || has("WITHDRAW") {
            return Some(TransactionKind::Withdrawal);
        }
        if has("KJØP") || has("BOUGHT") || has("BUY") {
            return Some(TransactionKind::Buy);
        }
        if has("SOLGT") || has("SALG") || has("SELL") || has("SOLD") {
            return Some(TransactionKind::Sell);
        }
        if has("GEBYR") || has("AVGIFT") || has("KURTASJE") || has("PROVISJON") || has("FEE") {
            return Some(TransactionKind::Fee);
        }
        None
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One mapped and validated row in canonical shape. Columns the
/// profile does not map survive in `extras`; errors and warnings
/// accumulate here and travel with the row to the end of the run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformedTransaction {
    pub line: usize,
    pub external_id: String,
    pub booking_date: Option<NaiveDate>,
    pub trade_date: Option<NaiveDate>,
    pub settlement_date: Option<NaiveDate>,
    pub portfolio: String,
    pub account_name: String,
    pub raw_type: String,
    pub kind: TransactionKind,
    pub security_name: Option<String>,
    pub isin: Option<String>,
    pub quantity: Option<Decimal>,
    pub price: Option<Decimal>,
    pub currency: Option<String>,
    pub amount: Option<Decimal>,
    pub fees: Option<Decimal>,
    pub note: Option<String>,
    pub needs_security: bool,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl TransformedTransaction {
    /// A row with any error never reaches persistent storage.
    pub fn is_importable(&self) -> bool {
        self.errors.is_empty()
    }
}

/// How rows already present in storage (same external id and owner)
/// are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateHandling {
    Skip,
    Update,
    Error,
}

/// Immutable per-run settings. This is the crate's whole tunable
/// surface; there is no CLI or environment layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    pub owner: String,
    pub encoding_override: Option<String>,
    pub delimiter_override: Option<u8>,
    pub skip_rows: usize,
    pub account_aliases: BTreeMap<String, String>,
    pub duplicate_handling: DuplicateHandling,
    pub create_missing_securities: bool,
    pub strict: bool,
    /// Allowed gap between quantity * price and the booked amount, as
    /// a fraction of that amount (0.01 = 1%).
    pub amount_tolerance: Decimal,
    pub header_match_threshold: f64,
}

impl ImportConfig {
    pub fn for_owner(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            ..Self::default()
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            owner: String::new(),
            encoding_override: None,
            delimiter_override: None,
            skip_rows: 0,
            account_aliases: BTreeMap::new(),
            duplicate_handling: DuplicateHandling::Skip,
            create_missing_securities: true,
            strict: false,
            amount_tolerance: Decimal::new(1, 2),
            header_match_threshold: 0.6,
        }
    }
}
