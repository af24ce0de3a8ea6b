//! Business rules applied after mapping. Findings append to the
//! row's own error and warning lists; nothing here aborts a run.

use rust_decimal::Decimal;

use crate::model::{ImportConfig, TransactionKind, TransformedTransaction};

/// Checks one mapped transaction against the rules a broker export
/// must satisfy before it may persist.
pub fn validate_transaction(tx: &mut TransformedTransaction, config: &ImportConfig) {
    if matches!(tx.kind, TransactionKind::Buy | TransactionKind::Sell) {
        if !is_positive(tx.quantity) {
            tx.errors
                .push(format!("{} requires a positive quantity", tx.kind.as_str()));
        }
        if !is_positive(tx.price) {
            tx.errors
                .push(format!("{} requires a positive price", tx.kind.as_str()));
        }
    }

    if let (Some(quantity), Some(price), Some(amount)) = (tx.quantity, tx.price, tx.amount) {
        match consistency_deviation(quantity, price, amount) {
            Some((expected, deviation)) => {
                // an uncomputable bound allows everything
                let allowed = config
                    .amount_tolerance
                    .checked_mul(amount.abs())
                    .unwrap_or(Decimal::MAX);
                if deviation > allowed {
                    tx.warnings.push(format!(
                        "Amount {} deviates from quantity * price {} by {}",
                        amount.abs(),
                        expected,
                        deviation
                    ));
                }
            }
            None => tx.warnings.push(format!(
                "Quantity {quantity} * price {price} exceeds the numeric range; amount consistency not checked"
            )),
        }
    }

    if tx.needs_security {
        if let Some(isin) = tx.isin.as_deref() {
            if !is_valid_isin(isin) {
                tx.errors.push(format!("Invalid ISIN '{isin}'"));
            }
        }
    }

    if let Some(currency) = tx.currency.as_deref() {
        if !is_currency_code(currency) {
            tx.errors.push(format!("Invalid currency code '{currency}'"));
        }
    }

    if let (Some(booking), Some(trade)) = (tx.booking_date, tx.trade_date) {
        if booking < trade {
            tx.warnings.push(format!(
                "Booking date {booking} precedes trade date {trade}"
            ));
        }
    }
}

fn is_positive(value: Option<Decimal>) -> bool {
    value.is_some_and(|v| v > Decimal::ZERO)
}

/// Expected trade value and its distance from the booked amount, or
/// `None` when the arithmetic leaves `Decimal` range.
fn consistency_deviation(
    quantity: Decimal,
    price: Decimal,
    amount: Decimal,
) -> Option<(Decimal, Decimal)> {
    let expected = quantity.checked_mul(price)?;
    let deviation = expected.checked_sub(amount.abs())?.abs();
    Some((expected, deviation))
}

fn is_currency_code(code: &str) -> bool {
    code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase())
}

/// Full-string ISIN check: two country letters, nine alphanumerics,
/// one check digit, validated by the Luhn scheme over the expansion
/// where letters become their base-36 values.
pub fn is_valid_isin(isin: &str) -> bool {
    if isin.len() != 12 {
        return false;
    }
    let bytes = isin.as_bytes();
    if !bytes[..2].iter().all(u8::is_ascii_uppercase) || !bytes[11].is_ascii_digit() {
        return false;
    }
    let mut digits = Vec::with_capacity(24);
    for &b in bytes {
        match b {
            b'0'..=b'9' => digits.push(b - b'0'),
            b'A'..=b'Z' => {
                let value = b - b'A' + 10;
                digits.push(value / 10);
                digits.push(value % 10);
            }
            _ => return false,
        }
    }
    let mut sum = 0u32;
    for (offset, &digit) in digits.iter().rev().enumerate() {
        let mut value = u32::from(digit);
        if offset % 2 == 1 {
            value *= 2;
            if value > 9 {
                value -= 9;
            }
        }
        sum += value;
    }
    sum % 10 == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;
    use std::str::FromStr;

    fn config() -> ImportConfig {
        ImportConfig::for_owner("tester")
    }

    fn buy(quantity: &str, price: &str, amount: &str) -> TransformedTransaction {
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
            quantity: Some(Decimal::from_str(quantity).unwrap()),
            price: Some(Decimal::from_str(price).unwrap()),
            currency: Some("NOK".to_string()),
            amount: Some(Decimal::from_str(amount).unwrap()),
            fees: None,
            note: None,
            needs_security: true,
            extras: BTreeMap::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    #[test]
    fn accepts_known_isins() {
        assert!(is_valid_isin("US0378331005"));
        assert!(is_valid_isin("NO0010081235"));
        assert!(is_valid_isin("US5949181045"));
    }

    #[test]
    fn rejects_malformed_isins() {
        assert!(!is_valid_isin("US0378331006"));
        assert!(!is_valid_isin("NO001008123"));
        assert!(!is_valid_isin("no0010081235"));
        assert!(!is_valid_isin("US03783310Ø5"));
        assert!(!is_valid_isin(""));
    }

    #[test]
    fn consistent_trade_passes_clean() {
        let mut tx = buy("66", "434.94", "-28706.04");
        validate_transaction(&mut tx, &config());
        assert!(tx.errors.is_empty(), "errors: {:?}", tx.errors);
        assert!(tx.warnings.is_empty(), "warnings: {:?}", tx.warnings);
    }

    #[test]
    fn trades_need_positive_quantity_and_price() {
        let mut tx = buy("-66", "434.94", "-28706.04");
        validate_transaction(&mut tx, &config());
        assert!(tx.errors.iter().any(|e| e.contains("positive quantity")));

        let mut tx = buy("66", "434.94", "-28706.04");
        tx.kind = TransactionKind::Sell;
        tx.price = None;
        validate_transaction(&mut tx, &config());
        assert!(tx.errors.iter().any(|e| e == "SELL requires a positive price"));
    }

    #[test]
    fn amount_outside_tolerance_warns() {
        // 706.04 off a 28000.00 booking is a 2.5% gap
        let mut tx = buy("66", "434.94", "-28000.00");
        validate_transaction(&mut tx, &config());
        assert!(tx.errors.is_empty());
        assert!(tx.warnings.iter().any(|w| w.contains("deviates")));
    }

    #[test]
    fn commission_sized_deviations_stay_quiet() {
        // 29.00 in fees folded into the total is well under 1%
        let mut tx = buy("66", "434.94", "-28735.04");
        validate_transaction(&mut tx, &config());
        assert!(tx.errors.is_empty(), "errors: {:?}", tx.errors);
        assert!(tx.warnings.is_empty(), "warnings: {:?}", tx.warnings);
    }

    #[test]
    fn consistency_math_survives_decimal_range_exhaustion() {
        let mut tx = buy("10000000000000000000", "10000000000000", "-28706.04");
        validate_transaction(&mut tx, &config());
        assert!(tx.errors.is_empty(), "errors: {:?}", tx.errors);
        assert!(tx.warnings.iter().any(|w| w.contains("numeric range")));

        let mut tx = buy(
            "-70000000000000000000000000000",
            "1",
            "-70000000000000000000000000000",
        );
        tx.kind = TransactionKind::Deposit;
        validate_transaction(&mut tx, &config());
        assert!(tx.errors.is_empty(), "errors: {:?}", tx.errors);
        assert!(tx.warnings.iter().any(|w| w.contains("numeric range")));
    }

    #[test]
    fn malformed_isin_blocks_the_row() {
        let mut tx = buy("66", "434.94", "-28706.04");
        tx.isin = Some("NO0010081234".to_string());
        validate_transaction(&mut tx, &config());
        assert!(!tx.is_importable());

        // rows that carry no identifier defer to security resolution
        let mut tx = buy("66", "434.94", "-28706.04");
        tx.isin = None;
        validate_transaction(&mut tx, &config());
        assert!(tx.errors.is_empty());
    }

    #[test]
    fn currency_must_be_three_uppercase_letters() {
        for bad in ["NOKK", "nok", "N1K", ""] {
            let mut tx = buy("66", "434.94", "-28706.04");
            tx.currency = Some(bad.to_string());
            validate_transaction(&mut tx, &config());
            assert!(
                tx.errors.iter().any(|e| e.contains("currency")),
                "'{bad}' should fail"
            );
        }
    }

    #[test]
    fn booking_before_trade_warns() {
        let mut tx = buy("66", "434.94", "-28706.04");
        tx.booking_date = NaiveDate::from_ymd_opt(2024, 5, 1);
        validate_transaction(&mut tx, &config());
        assert!(tx.warnings.iter().any(|w| w.contains("precedes")));
    }
}
