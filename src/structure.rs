//! Structural validation of the parsed header row.
//!
//! Resolves profile mappings to column indices once, so later stages
//! address fields by position. Exact header matches claim columns
//! first; case-insensitive substring containment is the fallback for
//! decorated headers like "Beløp (NOK)".

use log::debug;

use crate::mapping::MappingProfile;

const MIN_EXPECTED_COLUMNS: usize = 2;
const MAX_EXPECTED_COLUMNS: usize = 64;

/// Mapping index → column index binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedColumn {
    pub mapping_index: usize,
    pub column_index: usize,
}

#[derive(Debug, Clone, Default)]
pub struct StructureCheck {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub resolved: Vec<ResolvedColumn>,
    /// Columns no mapping claimed, preserved per row as extras.
    pub unmapped: Vec<(usize, String)>,
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

pub fn validate_structure(
    headers: &[String],
    profile: &MappingProfile,
    header_match_threshold: f64,
) -> StructureCheck {
    let mut check = StructureCheck::default();

    if headers.len() < MIN_EXPECTED_COLUMNS {
        check.errors.push(format!(
            "Header has only {} column(s); the delimiter guess is likely wrong",
            headers.len()
        ));
    } else if headers.len() > MAX_EXPECTED_COLUMNS {
        check.warnings.push(format!(
            "Header has {} columns, more than any known institution export",
            headers.len()
        ));
    }

    let mut claimed = vec![false; headers.len()];
    // exact matches first so "Kurs" never lands on "Valutakurs"
    for (mapping_index, mapping) in profile.mappings.iter().enumerate() {
        let source = mapping.source.to_lowercase();
        if let Some((column_index, _)) = headers
            .iter()
            .enumerate()
            .find(|(idx, h)| !claimed[*idx] && h.to_lowercase() == source)
        {
            claimed[column_index] = true;
            check.resolved.push(ResolvedColumn {
                mapping_index,
                column_index,
            });
        }
    }
    for (mapping_index, mapping) in profile.mappings.iter().enumerate() {
        if check
            .resolved
            .iter()
            .any(|r| r.mapping_index == mapping_index)
        {
            continue;
        }
        if let Some((column_index, _)) = headers
            .iter()
            .enumerate()
            .find(|(idx, h)| !claimed[*idx] && contains_ci(h, &mapping.source))
        {
            claimed[column_index] = true;
            check.resolved.push(ResolvedColumn {
                mapping_index,
                column_index,
            });
        }
    }
    for (idx, header) in headers.iter().enumerate() {
        if !claimed[idx] {
            check.unmapped.push((idx, header.clone()));
        }
    }

    for token in &profile.mandatory_columns {
        if !headers.iter().any(|h| contains_ci(h, token)) {
            check
                .errors
                .push(format!("Mandatory column '{token}' not found in header"));
        }
    }

    let recognized_share = check.resolved.len() as f64 / profile.mappings.len().max(1) as f64;
    if recognized_share < header_match_threshold {
        check.warnings.push(format!(
            "Only {} of {} expected columns recognized; mapping results may be sparse",
            check.resolved.len(),
            profile.mappings.len()
        ));
    }

    check.is_valid = check.errors.is_empty();
    debug!(
        "Structure check: {} resolved, {} unmapped, valid={}",
        check.resolved.len(),
        check.unmapped.len(),
        check.is_valid
    );
    check
}
