#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use encoding_rs::WINDOWS_1252;
use tempfile::{TempDir, tempdir};

/// Idempotent logger setup so failing tests show pipeline stages.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default())
        .is_test(true)
        .format_timestamp_millis()
        .try_init();
}

/// Header row of a Nordnet-style tab-separated export.
pub const NORDNET_HEADER: &str = "Id\tBokføringsdag\tHandelsdag\tOppgjørsdag\tPortefølje\tTransaksjonstype\tVerdipapir\tISIN\tAntall\tKurs\tValuta\tBeløp\tTotale Avgifter\tTransaksjonstekst";

/// Builds a complete export file from pre-joined data lines.
pub fn nordnet_export(rows: &[String]) -> String {
    let mut text = String::from(NORDNET_HEADER);
    for row in rows {
        text.push('\n');
        text.push_str(row);
    }
    text.push('\n');
    text
}

/// Encodes export text the way the broker actually ships it.
pub fn nordnet_bytes(rows: &[String]) -> Vec<u8> {
    let text = nordnet_export(rows);
    let (bytes, _, _) = WINDOWS_1252.encode(&text);
    bytes.into_owned()
}

/// A consistent KJØPT line: 66 × 434,94 NOK with 29,00 in fees.
pub fn buy_row(id: &str) -> String {
    format!(
        "{id}\t2024-05-06\t2024-05-03\t2024-05-07\t551234567\tKJØPT\tOrkla ASA\tNO0010081235\t66\t434,94\tNOK\t-28 706,04\t29,00\tKjøpt 66 stk"
    )
}

/// A cash deposit line with no security columns filled in.
pub fn deposit_row(id: &str, amount: &str) -> String {
    format!("{id}\t2024-05-02\t\t\t551234567\tINNSKUDD\t\t\t\t\tNOK\t{amount}\t\tInnskudd")
}

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        self.write_bytes(name, contents.as_bytes())
    }

    /// Byte-level variant for fixtures in legacy encodings.
    pub fn write_bytes(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents).expect("write temp file contents");
        path
    }
}
