use std::fmt;

use anyhow::{Result, anyhow, bail};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Declared type of a mapped column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Date,
    Flag,
}

/// A coerced field value. Monetary and quantity data parse into
/// `Decimal`; binary floats never touch money.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Number(Decimal),
    Date(NaiveDate),
    Flag(bool),
}

impl FieldValue {
    pub fn as_display(&self) -> String {
        match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Number(n) => n.to_string(),
            FieldValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            FieldValue::Flag(b) => b.to_string(),
        }
    }

    pub fn as_number(&self) -> Option<Decimal> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            FieldValue::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

/// Parses a number the way European brokerage exports print them:
/// embedded whitespace (including NBSP) as group padding, `.` or `,`
/// as grouping separators when followed by a run of exactly three
/// digits, and a trailing one- or two-digit comma group as the
/// decimal mark.
pub fn parse_locale_number(value: &str) -> Result<Decimal> {
    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        bail!("Empty numeric value");
    }
    let mut normalized = strip_grouping(&compact);
    if let Some(pos) = normalized.rfind(',') {
        let frac = &normalized[pos + 1..];
        if (1..=2).contains(&frac.len()) && frac.bytes().all(|b| b.is_ascii_digit()) {
            normalized.replace_range(pos..pos + 1, ".");
        }
    }
    let normalized = normalized.strip_prefix('+').unwrap_or(&normalized);
    normalized
        .parse::<Decimal>()
        .map_err(|_| anyhow!("Failed to parse '{value}' as number"))
}

fn strip_grouping(compact: &str) -> String {
    let mut out = String::with_capacity(compact.len());
    for (idx, c) in compact.char_indices() {
        if (c == '.' || c == ',') && is_grouping_separator(compact, idx) {
            continue;
        }
        out.push(c);
    }
    out
}

fn is_grouping_separator(s: &str, idx: usize) -> bool {
    let run = s[idx + 1..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .count();
    if run != 3 {
        return false;
    }
    let preceding: String = s[..idx]
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    // "0.123" is a plain decimal, never a grouped integer
    !preceding.is_empty() && preceding != "0"
}

pub fn parse_flexible_date(value: &str) -> Result<NaiveDate> {
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y", "%d-%m-%Y"];
    let trimmed = value.trim();
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as date"))
}

pub fn parse_locale_flag(value: &str) -> Result<bool> {
    let lowered = value.trim().to_lowercase();
    match lowered.as_str() {
        "ja" | "yes" | "true" | "1" | "j" | "y" => Ok(true),
        "nei" | "no" | "false" | "0" | "n" => Ok(false),
        _ => bail!("Failed to parse '{value}' as flag"),
    }
}

/// Coerces a raw field into its declared type. Blank input is `None`,
/// never an error; required-field enforcement belongs to the mapper.
pub fn coerce_value(value: &str, ty: FieldType) -> Result<Option<FieldValue>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let parsed = match ty {
        FieldType::Text => FieldValue::Text(trimmed.to_string()),
        FieldType::Number => FieldValue::Number(parse_locale_number(trimmed)?),
        FieldType::Date => FieldValue::Date(parse_flexible_date(trimmed)?),
        FieldType::Flag => FieldValue::Flag(parse_locale_flag(trimmed)?),
    };
    Ok(Some(parsed))
}
