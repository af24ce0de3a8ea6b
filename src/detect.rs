//! Encoding and delimiter detection for institution exports.
//!
//! Brokerage CSV files arrive with no reliable metadata: legacy 8-bit
//! pages, UTF-8 with or without BOM, the odd UTF-16 export, and
//! delimiters ranging from tabs to pipes. Detection is best-effort and
//! never fails; a wrong guess surfaces later as a structural error.
//!
//! - **BOM**: an explicit byte-order mark always wins.
//! - **Candidates**: locale-ordered encodings are trial-decoded and
//!   scored against accent characters, financial vocabulary, and
//!   expected header tokens from the active [`LocaleHints`].
//! - **Garbled decodes**: NULs, U+FFFD, or spaced single-letter runs
//!   (the UTF-16-read-as-8-bit shape) disqualify a candidate outright.
//! - **Delimiter**: the header line is split on each candidate and the
//!   one yielding the most columns wins, ties to the earlier candidate.

use std::sync::OnceLock;

use encoding_rs::{Encoding, UTF_8};
use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Bytes of file head consulted during detection.
pub const SNIFF_LEN: usize = 2048;

const ENCODING_SCORE_THRESHOLD: i32 = 2;
const ACCENT_SCORE_CAP: i32 = 3;
const VOCABULARY_SCORE_CAP: i32 = 2;
const HEADER_TOKEN_SCORE_CAP: i32 = 3;

/// Candidate delimiters in priority order.
pub const DELIMITER_CANDIDATES: &[u8] = &[b'\t', b';', b',', b'|'];

static SPACED_LETTER_RUN: OnceLock<Regex> = OnceLock::new();
static FINANCIAL_TOKENS: OnceLock<Regex> = OnceLock::new();

fn spaced_letter_run() -> &'static Regex {
    SPACED_LETTER_RUN.get_or_init(|| Regex::new(r"(?:\b\w ){4}\w\b").expect("valid pattern"))
}

fn financial_tokens() -> &'static Regex {
    FINANCIAL_TOKENS.get_or_init(|| {
        Regex::new(r"\d{6,}|[A-Z]{2}[A-Z0-9]{9}\d|\b(?:NOK|SEK|DKK|EUR|USD|GBP|CHF)\b")
            .expect("valid pattern")
    })
}

/// Locale knowledge used to rank candidate encodings. Lives on the
/// mapping profile so a new institution is data, not code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocaleHints {
    /// Encoding labels in trial order, resolved via `Encoding::for_label`.
    pub candidate_encodings: Vec<String>,
    /// Legacy 8-bit page assumed when no candidate clears the threshold.
    pub fallback_encoding: String,
    /// Locale accent characters whose presence marks a good decode.
    pub accent_chars: String,
    /// Lowercase financial vocabulary of the institution's exports.
    pub vocabulary: Vec<String>,
    /// Lowercase header tokens the institution is known to emit.
    pub header_tokens: Vec<String>,
}

impl LocaleHints {
    /// Hints for Norwegian brokerage exports (Nordnet-style).
    pub fn norwegian() -> Self {
        Self {
            candidate_encodings: vec![
                "windows-1252".to_string(),
                "iso-8859-15".to_string(),
                "utf-8".to_string(),
            ],
            fallback_encoding: "windows-1252".to_string(),
            accent_chars: "æøåÆØÅ".to_string(),
            vocabulary: vec![
                "beløp".to_string(),
                "kurs".to_string(),
                "antall".to_string(),
                "kjøpt".to_string(),
                "solgt".to_string(),
                "utbytte".to_string(),
                "verdipapir".to_string(),
            ],
            header_tokens: vec![
                "bokføringsdag".to_string(),
                "handelsdag".to_string(),
                "oppgjørsdag".to_string(),
                "portefølje".to_string(),
                "transaksjonstype".to_string(),
                "verdipapir".to_string(),
                "isin".to_string(),
                "antall".to_string(),
                "kurs".to_string(),
                "beløp".to_string(),
                "valuta".to_string(),
            ],
        }
    }
}

impl Default for LocaleHints {
    fn default() -> Self {
        Self::norwegian()
    }
}

/// Detected file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SniffedFormat {
    pub encoding: &'static Encoding,
    pub delimiter: u8,
}

/// Clamps the detection sample to a line boundary so a multibyte
/// sequence cut at the buffer edge cannot fail an otherwise valid
/// candidate.
pub fn head_sample(bytes: &[u8]) -> &[u8] {
    if bytes.len() <= SNIFF_LEN {
        return bytes;
    }
    let head = &bytes[..SNIFF_LEN];
    match head.iter().rposition(|&b| b == b'\n') {
        Some(pos) => &head[..=pos],
        None => head,
    }
}

pub fn detect_encoding(head: &[u8], hints: &LocaleHints) -> &'static Encoding {
    if let Some((encoding, _)) = Encoding::for_bom(head) {
        debug!("Encoding {} selected by byte-order mark", encoding.name());
        return encoding;
    }
    for label in &hints.candidate_encodings {
        let Some(encoding) = Encoding::for_label(label.as_bytes()) else {
            warn!("Ignoring unknown candidate encoding label '{label}'");
            continue;
        };
        let (text, had_errors) = encoding.decode_without_bom_handling(head);
        if had_errors {
            debug!("Encoding candidate {} failed to decode", encoding.name());
            continue;
        }
        if looks_garbled(&text) {
            debug!("Encoding candidate {} produced garbled text", encoding.name());
            continue;
        }
        let score = score_decode(&text, hints);
        debug!("Encoding candidate {} scored {score}", encoding.name());
        if score >= ENCODING_SCORE_THRESHOLD {
            return encoding;
        }
    }
    let fallback =
        Encoding::for_label(hints.fallback_encoding.as_bytes()).unwrap_or(UTF_8);
    debug!("No encoding candidate cleared threshold; assuming {}", fallback.name());
    fallback
}

/// Signatures of a wrong 8-bit read of wider text: NULs, replacement
/// characters, or letters spaced out one per character cell.
fn looks_garbled(text: &str) -> bool {
    text.contains('\u{0}')
        || text.contains('\u{fffd}')
        || spaced_letter_run().is_match(text)
}

fn score_decode(text: &str, hints: &LocaleHints) -> i32 {
    let lowered = text.to_lowercase();
    let mut score = 0;

    let accents = hints
        .accent_chars
        .chars()
        .filter(|c| text.contains(*c))
        .count() as i32;
    score += accents.min(ACCENT_SCORE_CAP);

    let vocabulary = hints
        .vocabulary
        .iter()
        .filter(|term| lowered.contains(term.as_str()))
        .count() as i32;
    score += vocabulary.min(VOCABULARY_SCORE_CAP);

    let headers = hints
        .header_tokens
        .iter()
        .filter(|token| lowered.contains(token.as_str()))
        .count() as i32;
    score += headers.min(HEADER_TOKEN_SCORE_CAP);

    if financial_tokens().is_match(text) {
        score += 1;
    }
    score
}

/// Splits the header line on each candidate; most columns wins, ties
/// prefer the earlier candidate.
pub fn detect_delimiter(header_line: &str) -> u8 {
    let mut best = (DELIMITER_CANDIDATES[0], 0usize);
    for &candidate in DELIMITER_CANDIDATES {
        let columns = header_line.split(candidate as char).count();
        if columns > best.1 {
            best = (candidate, columns);
        }
    }
    best.0
}

/// Full format sniff over the file head. `skip_rows` preamble lines are
/// ignored before the header line is inspected for its delimiter.
pub fn sniff_format(bytes: &[u8], hints: &LocaleHints, skip_rows: usize) -> SniffedFormat {
    let head = head_sample(bytes);
    let encoding = detect_encoding(head, hints);
    let (text, _, _) = encoding.decode(head);
    let header_line = text.lines().nth(skip_rows).unwrap_or_default();
    let delimiter = detect_delimiter(header_line);
    debug!(
        "Sniffed format: encoding={} delimiter={:?}",
        encoding.name(),
        delimiter as char
    );
    SniffedFormat {
        encoding,
        delimiter,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::{UTF_16BE, UTF_16LE, WINDOWS_1252};

    fn hints() -> LocaleHints {
        LocaleHints::norwegian()
    }

    #[test]
    fn bom_wins_over_candidate_scoring() {
        let mut utf16 = vec![0xFF, 0xFE];
        for unit in "Id\tBeløp\n".encode_utf16() {
            utf16.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(detect_encoding(&utf16, &hints()), UTF_16LE);

        let mut utf16be = vec![0xFE, 0xFF];
        for unit in "Id\tBeløp\n".encode_utf16() {
            utf16be.extend_from_slice(&unit.to_be_bytes());
        }
        assert_eq!(detect_encoding(&utf16be, &hints()), UTF_16BE);

        let utf8_bom = b"\xEF\xBB\xBFId;Bel\xC3\xB8p\n";
        assert_eq!(detect_encoding(utf8_bom, &hints()), UTF_8);
    }

    #[test]
    fn legacy_page_detected_from_accents_and_headers() {
        let (encoded, _, _) = WINDOWS_1252.encode("Bokføringsdag\tTransaksjonstype\tBeløp\n");
        assert_eq!(detect_encoding(&encoded, &hints()), WINDOWS_1252);
    }

    #[test]
    fn utf8_detected_when_legacy_read_breaks_accents() {
        let text = "Bokføringsdag\tTransaksjonstype\tBeløp\n2024-05-06\tKJØPT\t-28706,04\n";
        assert_eq!(detect_encoding(text.as_bytes(), &hints()), UTF_8);
    }

    #[test]
    fn bomless_utf16_never_selected_as_candidate() {
        let mut utf16: Vec<u8> = Vec::new();
        for unit in "Bokføringsdag\tBeløp\n".encode_utf16() {
            utf16.extend_from_slice(&unit.to_le_bytes());
        }
        // NUL-ridden decodes are disqualified; only the fallback remains.
        assert_eq!(detect_encoding(&utf16, &hints()), WINDOWS_1252);
    }

    #[test]
    fn ascii_only_head_falls_back_to_legacy_page() {
        assert_eq!(detect_encoding(b"a,b\n1,2\n", &hints()), WINDOWS_1252);
    }

    #[test]
    fn delimiter_by_column_count_with_tab_preference() {
        assert_eq!(detect_delimiter("Id\tDato\tBeløp"), b'\t');
        assert_eq!(detect_delimiter("Id;Dato;Beløp"), b';');
        assert_eq!(detect_delimiter("Id,Dato,Beløp,Valuta"), b',');
        assert_eq!(detect_delimiter("Id|Dato|Beløp"), b'|');
        // single column everywhere: earliest candidate wins
        assert_eq!(detect_delimiter("Id"), b'\t');
    }

    #[test]
    fn sniff_honors_preamble_skip() {
        let bytes = b"Nordnet eksport 2024\nId;Dato;Bel\xF8p\n1;2024-05-06;42\n";
        let format = sniff_format(bytes, &hints(), 1);
        assert_eq!(format.delimiter, b';');
        assert_eq!(format.encoding, WINDOWS_1252);
    }

    #[test]
    fn head_sample_clamps_to_line_boundary() {
        let mut big = "Bokføringsdag;Beløp\n".repeat(200).into_bytes();
        big.truncate(SNIFF_LEN + 100);
        let head = head_sample(&big);
        assert!(head.len() <= SNIFF_LEN);
        assert_eq!(head.last(), Some(&b'\n'));
    }
}
