//! Applies a mapping profile to parsed rows, producing canonical
//! transactions with their derived fields.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use heck::ToTitleCase;
use log::warn;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

use crate::{
    mapping::{CanonicalField, MappingProfile},
    model::{ImportConfig, TransactionKind, TransformedTransaction},
    rows::RawRow,
    structure::StructureCheck,
    values::{self, FieldValue},
};

fn take_text(typed: &mut BTreeMap<CanonicalField, FieldValue>, field: CanonicalField) -> Option<String> {
    typed.remove(&field).and_then(FieldValue::into_text)
}

fn take_number(typed: &mut BTreeMap<CanonicalField, FieldValue>, field: CanonicalField) -> Option<Decimal> {
    typed.remove(&field).and_then(|v| v.as_number())
}

fn take_date(typed: &mut BTreeMap<CanonicalField, FieldValue>, field: CanonicalField) -> Option<NaiveDate> {
    typed.remove(&field).and_then(|v| v.as_date())
}

/// Maps one raw row through the profile. Never fails: everything a
/// row does wrong lands in its own error and warning lists.
pub fn map_row(
    row: &RawRow,
    check: &StructureCheck,
    profile: &MappingProfile,
    config: &ImportConfig,
) -> TransformedTransaction {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut typed: BTreeMap<CanonicalField, FieldValue> = BTreeMap::new();

    for resolved in &check.resolved {
        let mapping = &profile.mappings[resolved.mapping_index];
        let raw = row.get(resolved.column_index).unwrap_or_default().trim();
        if raw.is_empty() {
            if mapping.required {
                errors.push(format!(
                    "Missing required field '{}'",
                    mapping.target.as_str()
                ));
            }
            continue;
        }
        if let Some(rule) = mapping.validate {
            if let Err(err) = rule.apply(raw) {
                errors.push(format!("{}: {err}", mapping.target.as_str()));
                continue;
            }
        }
        let transformed = match mapping.transform {
            Some(rule) => rule.apply(raw),
            None => raw.to_string(),
        };
        match values::coerce_value(&transformed, mapping.field_type) {
            Ok(Some(value)) => {
                typed.insert(mapping.target, value);
            }
            Ok(None) => {}
            Err(err) => {
                if mapping.required {
                    errors.push(format!("{}: {err}", mapping.target.as_str()));
                } else {
                    warnings.push(format!("{}: {err}", mapping.target.as_str()));
                }
            }
        }
    }
    // required mappings whose column never resolved at all
    for (index, mapping) in profile.mappings.iter().enumerate() {
        if mapping.required && !check.resolved.iter().any(|r| r.mapping_index == index) {
            errors.push(format!(
                "Missing required field '{}'",
                mapping.target.as_str()
            ));
        }
    }

    let portfolio = take_text(&mut typed, CanonicalField::Portfolio).unwrap_or_default();
    let raw_type = take_text(&mut typed, CanonicalField::TransactionType).unwrap_or_default();
    let account_name = derive_account_name(profile, config, &portfolio);

    let kind = if raw_type.is_empty() {
        // the missing-required error already covers this row
        TransactionKind::Fee
    } else {
        match profile
            .kind_for_label(&raw_type)
            .or_else(|| TransactionKind::from_keywords(&raw_type))
        {
            Some(kind) => kind,
            None if config.strict => {
                errors.push(format!("Unknown transaction type '{raw_type}'"));
                TransactionKind::Fee
            }
            None => {
                warn!(
                    "Unknown transaction type '{raw_type}' at line {}; importing as FEE",
                    row.line
                );
                warnings.push(format!(
                    "Unknown transaction type '{raw_type}' imported as FEE"
                ));
                TransactionKind::Fee
            }
        }
    };

    let mut extras = BTreeMap::new();
    for (column_index, header) in &check.unmapped {
        if let Some(value) = row.get(*column_index) {
            let value = value.trim();
            if !value.is_empty() {
                extras.insert(header.clone(), value.to_string());
            }
        }
    }

    let mut tx = TransformedTransaction {
        line: row.line,
        external_id: take_text(&mut typed, CanonicalField::ExternalId).unwrap_or_default(),
        booking_date: take_date(&mut typed, CanonicalField::BookingDate),
        trade_date: take_date(&mut typed, CanonicalField::TradeDate),
        settlement_date: take_date(&mut typed, CanonicalField::SettlementDate),
        portfolio,
        account_name,
        raw_type,
        kind,
        security_name: take_text(&mut typed, CanonicalField::SecurityName),
        isin: take_text(&mut typed, CanonicalField::Isin),
        quantity: take_number(&mut typed, CanonicalField::Quantity),
        price: take_number(&mut typed, CanonicalField::Price),
        currency: take_text(&mut typed, CanonicalField::Currency),
        amount: take_number(&mut typed, CanonicalField::Amount),
        fees: take_number(&mut typed, CanonicalField::Fees),
        note: take_text(&mut typed, CanonicalField::Note),
        needs_security: kind.needs_security(),
        extras,
        errors,
        warnings,
    };
    if tx.external_id.is_empty() {
        tx.external_id = synthesize_external_id(&tx);
    }
    tx
}

/// Human-readable account name from the raw portfolio identifier.
/// Configured aliases win; bare account numbers keep their last four
/// digits behind the institution name; anything else is title-cased.
fn derive_account_name(profile: &MappingProfile, config: &ImportConfig, portfolio: &str) -> String {
    if let Some(alias) = config.account_aliases.get(portfolio) {
        return alias.clone();
    }
    let trimmed = portfolio.trim();
    if trimmed.is_empty() {
        return profile.institution.clone();
    }
    if trimmed.chars().all(|c| c.is_ascii_digit()) {
        let tail = &trimmed[trimmed.len().saturating_sub(4)..];
        return format!("{} {}", profile.institution, tail);
    }
    trimmed.to_title_case()
}

/// Deterministic stand-in id for rows the institution exported
/// without one, so dedup and attribution still work. Hashes the
/// canonical fields, not the raw line, surviving cosmetic reformats.
fn synthesize_external_id(tx: &TransformedTransaction) -> String {
    let date = tx
        .booking_date
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default();
    let normalized_type = tx.raw_type.trim().to_uppercase();
    let decimal_part = |value: Option<Decimal>| value.map(|v| v.to_string()).unwrap_or_default();
    let parts = [
        date,
        normalized_type,
        tx.portfolio.clone(),
        tx.isin.clone().unwrap_or_default(),
        tx.security_name.clone().unwrap_or_default(),
        decimal_part(tx.quantity),
        decimal_part(tx.price),
        decimal_part(tx.amount),
        tx.currency.clone().unwrap_or_default(),
    ];
    let mut hasher = Sha256::new();
    for part in &parts {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    format!("gen-{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::validate_structure;
    use std::str::FromStr;

    fn profile() -> MappingProfile {
        MappingProfile::nordnet()
    }

    fn config() -> ImportConfig {
        ImportConfig::for_owner("tester")
    }

    fn nordnet_headers() -> Vec<String> {
        [
            "Id",
            "Bokføringsdag",
            "Handelsdag",
            "Oppgjørsdag",
            "Portefølje",
            "Transaksjonstype",
            "Verdipapir",
            "ISIN",
            "Antall",
            "Kurs",
            "Valuta",
            "Beløp",
            "Totale Avgifter",
            "Transaksjonstekst",
        ]
        .iter()
        .map(|h| h.to_string())
        .collect()
    }

    fn row(fields: &[&str]) -> RawRow {
        RawRow {
            line: 2,
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    fn buy_row() -> RawRow {
        row(&[
            "860271458",
            "2024-05-06",
            "2024-05-03",
            "2024-05-07",
            "551234567",
            "KJØPT",
            "Orkla ASA",
            "no0010081235",
            "66",
            "434,94",
            "nok",
            "-28 706,04",
            "29,00",
            "Kjøpt 66 stk",
        ])
    }

    #[test]
    fn maps_a_full_nordnet_buy_row() {
        let profile = profile();
        let check = validate_structure(&nordnet_headers(), &profile, 0.6);
        let tx = map_row(&buy_row(), &check, &profile, &config());

        assert!(tx.errors.is_empty(), "unexpected errors: {:?}", tx.errors);
        assert_eq!(tx.external_id, "860271458");
        assert_eq!(tx.kind, TransactionKind::Buy);
        assert_eq!(tx.booking_date, chrono::NaiveDate::from_ymd_opt(2024, 5, 6));
        assert_eq!(tx.quantity, Some(Decimal::from_str("66").unwrap()));
        assert_eq!(tx.price, Some(Decimal::from_str("434.94").unwrap()));
        assert_eq!(tx.amount, Some(Decimal::from_str("-28706.04").unwrap()));
        assert_eq!(tx.fees, Some(Decimal::from_str("29.00").unwrap()));
        assert_eq!(tx.currency.as_deref(), Some("NOK"));
        assert_eq!(tx.isin.as_deref(), Some("NO0010081235"));
        assert_eq!(tx.account_name, "Nordnet 4567");
        assert!(tx.needs_security);
    }

    #[test]
    fn missing_required_fields_error_but_mapping_continues() {
        let profile = profile();
        let check = validate_structure(&nordnet_headers(), &profile, 0.6);
        let mut blank_amount = buy_row();
        blank_amount.fields[11] = String::new();
        let tx = map_row(&blank_amount, &check, &profile, &config());

        assert_eq!(tx.errors.len(), 1);
        assert!(tx.errors[0].contains("amount"));
        assert_eq!(tx.kind, TransactionKind::Buy);
        assert!(!tx.is_importable());
    }

    #[test]
    fn unknown_label_falls_back_to_fee_with_warning() {
        let profile = profile();
        let check = validate_structure(&nordnet_headers(), &profile, 0.6);
        let mut unknown = buy_row();
        unknown.fields[5] = "MYSTISK HENDELSE".to_string();
        let tx = map_row(&unknown, &check, &profile, &config());

        assert_eq!(tx.kind, TransactionKind::Fee);
        assert!(tx.errors.is_empty());
        assert!(tx.warnings.iter().any(|w| w.contains("MYSTISK HENDELSE")));
        assert_eq!(tx.raw_type, "MYSTISK HENDELSE");
    }

    #[test]
    fn strict_mode_rejects_unknown_labels() {
        let profile = profile();
        let check = validate_structure(&nordnet_headers(), &profile, 0.6);
        let mut unknown = buy_row();
        unknown.fields[5] = "MYSTISK HENDELSE".to_string();
        let strict = ImportConfig {
            strict: true,
            ..config()
        };
        let tx = map_row(&unknown, &check, &profile, &strict);

        assert!(!tx.is_importable());
        assert!(tx.errors.iter().any(|e| e.contains("MYSTISK HENDELSE")));
    }

    #[test]
    fn synthesized_id_is_deterministic_and_prefixed() {
        let profile = profile();
        let check = validate_structure(&nordnet_headers(), &profile, 0.6);
        let mut no_id = buy_row();
        no_id.fields[0] = String::new();

        let first = map_row(&no_id, &check, &profile, &config());
        let second = map_row(&no_id, &check, &profile, &config());
        assert!(first.external_id.starts_with("gen-"));
        assert_eq!(first.external_id, second.external_id);
        assert!(first.errors.is_empty());

        let mut different = no_id.clone();
        different.fields[11] = "-1,00".to_string();
        let third = map_row(&different, &check, &profile, &config());
        assert_ne!(first.external_id, third.external_id);
    }

    #[test]
    fn unmapped_columns_survive_in_the_side_table() {
        let profile = profile();
        let mut headers = nordnet_headers();
        headers.push("Makuleringsdato".to_string());
        let check = validate_structure(&headers, &profile, 0.6);
        let mut cancelled = buy_row();
        cancelled.fields.push("2024-06-01".to_string());
        let tx = map_row(&cancelled, &check, &profile, &config());

        assert_eq!(
            tx.extras.get("Makuleringsdato").map(String::as_str),
            Some("2024-06-01")
        );
    }

    #[test]
    fn account_names_derive_from_portfolio_shape() {
        let profile = profile();
        let mut aliased = config();
        aliased
            .account_aliases
            .insert("551234567".to_string(), "Pension".to_string());

        assert_eq!(
            derive_account_name(&profile, &aliased, "551234567"),
            "Pension"
        );
        assert_eq!(
            derive_account_name(&profile, &config(), "551234567"),
            "Nordnet 4567"
        );
        assert_eq!(
            derive_account_name(&profile, &config(), "aksjesparekonto"),
            "Aksjesparekonto"
        );
        assert_eq!(derive_account_name(&profile, &config(), ""), "Nordnet");
    }

    #[test]
    fn transform_rules_normalize_before_coercion() {
        let profile = profile();
        let check = validate_structure(&nordnet_headers(), &profile, 0.6);
        let mut messy = buy_row();
        messy.fields[6] = "Orkla   ASA ".to_string();
        let tx = map_row(&messy, &check, &profile, &config());

        assert_eq!(tx.security_name.as_deref(), Some("Orkla ASA"));
    }
}
