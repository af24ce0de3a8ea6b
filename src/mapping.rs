//! Declarative mapping profiles: institution exports as data.
//!
//! A [`MappingProfile`] describes one institution's CSV dialect:
//!
//! - **Field mappings**: source column → canonical field, with a
//!   declared type, a required flag, and optional named validate and
//!   transform rules resolved through fixed dispatch tables.
//! - **Locale hints**: encoding candidates and scoring vocabulary for
//!   the detector.
//! - **Type labels**: the institution's transaction-type vocabulary,
//!   resolved before the generic keyword fallback.
//!
//! Profiles serialize to YAML so new institutions ship as files, and a
//! [`ProfileRegistry`] built once at startup holds the named set.

use std::{collections::BTreeMap, fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result, bail, ensure};
use serde::{Deserialize, Serialize};

use crate::{detect::LocaleHints, model::TransactionKind, values::FieldType};

/// Canonical targets a source column can map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    ExternalId,
    BookingDate,
    TradeDate,
    SettlementDate,
    Portfolio,
    TransactionType,
    SecurityName,
    Isin,
    Quantity,
    Price,
    Currency,
    Amount,
    Fees,
    Note,
}

impl CanonicalField {
    pub fn as_str(self) -> &'static str {
        match self {
            CanonicalField::ExternalId => "external_id",
            CanonicalField::BookingDate => "booking_date",
            CanonicalField::TradeDate => "trade_date",
            CanonicalField::SettlementDate => "settlement_date",
            CanonicalField::Portfolio => "portfolio",
            CanonicalField::TransactionType => "transaction_type",
            CanonicalField::SecurityName => "security_name",
            CanonicalField::Isin => "isin",
            CanonicalField::Quantity => "quantity",
            CanonicalField::Price => "price",
            CanonicalField::Currency => "currency",
            CanonicalField::Amount => "amount",
            CanonicalField::Fees => "fees",
            CanonicalField::Note => "note",
        }
    }

    pub fn expected_type(self) -> FieldType {
        match self {
            CanonicalField::BookingDate
            | CanonicalField::TradeDate
            | CanonicalField::SettlementDate => FieldType::Date,
            CanonicalField::Quantity
            | CanonicalField::Price
            | CanonicalField::Amount
            | CanonicalField::Fees => FieldType::Number,
            _ => FieldType::Text,
        }
    }
}

/// Named validation rules referencable from profile data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidateRule {
    NonBlank,
    CurrencyCode,
    IsinShape,
}

impl ValidateRule {
    pub fn apply(self, value: &str) -> Result<()> {
        match self {
            ValidateRule::NonBlank => {
                ensure!(!value.trim().is_empty(), "Value is blank");
            }
            ValidateRule::CurrencyCode => {
                ensure!(
                    value.len() == 3 && value.bytes().all(|b| b.is_ascii_uppercase()),
                    "'{value}' is not a three-letter currency code"
                );
            }
            ValidateRule::IsinShape => {
                let bytes = value.as_bytes();
                ensure!(
                    bytes.len() == 12
                        && bytes[..2].iter().all(u8::is_ascii_alphabetic)
                        && bytes.iter().all(u8::is_ascii_alphanumeric),
                    "'{value}' is not shaped like an ISIN"
                );
            }
        }
        Ok(())
    }
}

/// Named transform rules referencable from profile data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransformRule {
    Uppercase,
    CollapseWhitespace,
}

impl TransformRule {
    pub fn apply(self, value: &str) -> String {
        match self {
            TransformRule::Uppercase => value.to_uppercase(),
            TransformRule::CollapseWhitespace => {
                value.split_whitespace().collect::<Vec<_>>().join(" ")
            }
        }
    }
}

/// One declarative column mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub source: String,
    pub target: CanonicalField,
    #[serde(default)]
    pub required: bool,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validate: Option<ValidateRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<TransformRule>,
}

/// Everything the pipeline knows about one institution's exports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingProfile {
    pub institution: String,
    #[serde(default)]
    pub locale: LocaleHints,
    pub default_currency: String,
    /// Header tokens whose absence fails the file structurally.
    pub mandatory_columns: Vec<String>,
    pub mappings: Vec<FieldMapping>,
    /// Uppercase institution label → kind, consulted before the
    /// keyword fallback.
    #[serde(default)]
    pub type_labels: BTreeMap<String, TransactionKind>,
}

impl MappingProfile {
    /// Built-in profile for Norwegian Nordnet-style exports: tab
    /// delimited, windows-1252 by default, Norwegian headers and
    /// transaction vocabulary.
    pub fn nordnet() -> Self {
        let mapping = |source: &str,
                       target: CanonicalField,
                       required: bool,
                       field_type: FieldType|
         -> FieldMapping {
            FieldMapping {
                source: source.to_string(),
                target,
                required,
                field_type,
                validate: None,
                transform: None,
            }
        };
        let mut mappings = vec![
            mapping("Id", CanonicalField::ExternalId, false, FieldType::Text),
            mapping(
                "Bokføringsdag",
                CanonicalField::BookingDate,
                true,
                FieldType::Date,
            ),
            mapping("Handelsdag", CanonicalField::TradeDate, false, FieldType::Date),
            mapping(
                "Oppgjørsdag",
                CanonicalField::SettlementDate,
                false,
                FieldType::Date,
            ),
            mapping("Portefølje", CanonicalField::Portfolio, true, FieldType::Text),
            mapping(
                "Transaksjonstype",
                CanonicalField::TransactionType,
                true,
                FieldType::Text,
            ),
            mapping(
                "Verdipapir",
                CanonicalField::SecurityName,
                false,
                FieldType::Text,
            ),
            mapping("ISIN", CanonicalField::Isin, false, FieldType::Text),
            mapping("Antall", CanonicalField::Quantity, false, FieldType::Number),
            mapping("Kurs", CanonicalField::Price, false, FieldType::Number),
            mapping("Valuta", CanonicalField::Currency, true, FieldType::Text),
            mapping("Beløp", CanonicalField::Amount, true, FieldType::Number),
            mapping(
                "Totale Avgifter",
                CanonicalField::Fees,
                false,
                FieldType::Number,
            ),
            mapping(
                "Transaksjonstekst",
                CanonicalField::Note,
                false,
                FieldType::Text,
            ),
        ];
        for entry in &mut mappings {
            match entry.target {
                CanonicalField::Isin | CanonicalField::Currency => {
                    entry.transform = Some(TransformRule::Uppercase);
                }
                CanonicalField::SecurityName => {
                    entry.transform = Some(TransformRule::CollapseWhitespace);
                }
                _ => {}
            }
        }

        let type_labels: BTreeMap<String, TransactionKind> = [
            ("KJØPT", TransactionKind::Buy),
            ("SALG", TransactionKind::Sell),
            ("SOLGT", TransactionKind::Sell),
            ("UTBYTTE", TransactionKind::Dividend),
            ("KILDESKATT", TransactionKind::Tax),
            ("INNSKUDD", TransactionKind::Deposit),
            ("UTTAK", TransactionKind::Withdrawal),
            ("DEBETRENTE", TransactionKind::Interest),
            ("KREDITRENTE", TransactionKind::Interest),
            ("PLATTFORMAVGIFT", TransactionKind::Fee),
            ("AKSJESPLITT", TransactionKind::Split),
        ]
        .into_iter()
        .map(|(label, kind)| (label.to_string(), kind))
        .collect();

        Self {
            institution: "Nordnet".to_string(),
            locale: LocaleHints::norwegian(),
            default_currency: "NOK".to_string(),
            mandatory_columns: vec![
                "Bokføringsdag".to_string(),
                "Transaksjonstype".to_string(),
                "Beløp".to_string(),
            ],
            mappings,
            type_labels,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening profile file {path:?}"))?;
        let reader = BufReader::new(file);
        let profile: MappingProfile =
            serde_yaml::from_reader(reader).context("Parsing profile YAML")?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("Creating profile file {path:?}"))?;
        serde_yaml::to_writer(file, self).context("Writing profile YAML")
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Serializing profile to YAML string")
    }

    /// Structural coherence of the profile itself, checked once at
    /// load or registration.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.mappings.is_empty(),
            "Profile '{}' declares no mappings",
            self.institution
        );
        let mut seen = BTreeMap::new();
        for entry in &self.mappings {
            if let Some(previous) = seen.insert(entry.target, &entry.source) {
                bail!(
                    "Profile '{}' maps both '{previous}' and '{}' to {}",
                    self.institution,
                    entry.source,
                    entry.target.as_str()
                );
            }
            ensure!(
                entry.field_type == entry.target.expected_type(),
                "Profile '{}' declares {} for {} (expected {:?})",
                self.institution,
                entry.source,
                entry.target.as_str(),
                entry.target.expected_type()
            );
        }
        ensure!(
            seen.contains_key(&CanonicalField::TransactionType),
            "Profile '{}' has no transaction_type mapping",
            self.institution
        );
        for token in &self.mandatory_columns {
            ensure!(
                self.mappings
                    .iter()
                    .any(|m| m.source.eq_ignore_ascii_case(token)),
                "Mandatory column '{token}' has no mapping in profile '{}'",
                self.institution
            );
        }
        Ok(())
    }

    pub fn mapping_for(&self, target: CanonicalField) -> Option<&FieldMapping> {
        self.mappings.iter().find(|m| m.target == target)
    }

    /// Institution label lookup, case- and whitespace-insensitive.
    pub fn kind_for_label(&self, label: &str) -> Option<TransactionKind> {
        self.type_labels.get(&label.trim().to_uppercase()).copied()
    }
}

/// Explicit registry of named profiles built once at startup and
/// passed by reference; no global mutable state.
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    profiles: BTreeMap<String, MappingProfile>,
}

impl ProfileRegistry {
    /// Registry preloaded with the built-in profiles.
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        registry
            .register("nordnet-no", MappingProfile::nordnet())
            .expect("built-in profile validates");
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, profile: MappingProfile) -> Result<()> {
        profile.validate()?;
        self.profiles.insert(name.into(), profile);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&MappingProfile> {
        self.profiles.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }
}
