//! Import orchestration: runs the pipeline stages over one export
//! file and commits the surviving rows against a [`PortfolioStore`].
//!
//! Stage order is fixed: contract check, format sniffing, row parsing,
//! structural validation, mapping, business rules, then resolution of
//! platform/accounts/securities and the batched commit. Every step is
//! tolerant of per-item failure; only configuration errors and
//! platform-level storage failures abort the run.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
    sync::{Arc, OnceLock},
};

use encoding_rs::Encoding;
use itertools::Itertools;
use log::{debug, info};
use regex::Regex;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    detect,
    error::{ImportError, StorageError},
    io_utils, mapper,
    mapping::MappingProfile,
    model::{DuplicateHandling, ImportConfig, TransformedTransaction},
    report::{FileValidation, ImportResult},
    rows::{self, ParsedRows},
    storage::{
        NewAccount, NewPlatform, NewPortfolio, NewSecurity, NewTransaction, PlatformRecord,
        PortfolioStore,
    },
    structure::{self, StructureCheck},
    validate,
};

pub use crate::storage::AccountType;

/// Rows per storage write. Dedup lookups are scoped to the same chunk.
pub const BATCH_SIZE: usize = 100;

static SYMBOL_TOKEN: OnceLock<Regex> = OnceLock::new();

fn symbol_token() -> &'static Regex {
    SYMBOL_TOKEN.get_or_init(|| Regex::new(r"[A-Za-z][A-Za-z0-9]{1,11}").expect("valid pattern"))
}

/// One import pipeline bound to a store, a mapping profile, and a
/// per-run configuration.
pub struct Importer {
    store: Arc<dyn PortfolioStore>,
    profile: MappingProfile,
    config: ImportConfig,
}

struct PreparedFile {
    encoding: &'static Encoding,
    delimiter: u8,
    parsed: ParsedRows,
    check: StructureCheck,
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl Importer {
    pub fn new(
        store: Arc<dyn PortfolioStore>,
        profile: MappingProfile,
        config: ImportConfig,
    ) -> Result<Self, ImportError> {
        profile
            .validate()
            .map_err(|err| ImportError::Config(format!("{err:#}")))?;
        Ok(Self {
            store,
            profile,
            config,
        })
    }

    /// Reads and imports one export file.
    pub fn import_path(&self, path: &Path) -> Result<ImportResult, ImportError> {
        let bytes = io_utils::read_input(path)?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.import_bytes(&bytes, &filename)
    }

    /// Imports already-loaded export bytes. `filename` only feeds the
    /// input contract check and log lines.
    pub fn import_bytes(&self, bytes: &[u8], filename: &str) -> Result<ImportResult, ImportError> {
        let batch_id = Uuid::new_v4();
        let checksum = format!("{:x}", Sha256::digest(bytes));
        let mut result = ImportResult::new(batch_id, checksum);
        info!(
            "Importing '{filename}' ({} bytes) as batch {batch_id}",
            bytes.len()
        );

        let prepared = self.prepare(bytes, filename)?;
        result.parsed_rows = prepared.parsed.rows.len();
        result.warnings.extend(prepared.warnings);
        if !prepared.errors.is_empty() {
            result.errors.extend(prepared.errors);
            return Ok(result);
        }

        let mut processed = Vec::with_capacity(prepared.parsed.rows.len());
        for row in &prepared.parsed.rows {
            let mut tx = mapper::map_row(row, &prepared.check, &self.profile, &self.config);
            validate::validate_transaction(&mut tx, &self.config);
            processed.push(tx);
        }
        result.transformed_rows = processed.len();
        for tx in &processed {
            for err in &tx.errors {
                result
                    .errors
                    .push(format!("Line {} [{}]: {err}", tx.line, tx.external_id));
            }
            for warning in &tx.warnings {
                result
                    .warnings
                    .push(format!("Line {} [{}]: {warning}", tx.line, tx.external_id));
            }
        }

        let platform = self.resolve_platform()?;
        let accounts = self.resolve_accounts(&platform, &processed, &mut result);
        let (securities, excluded) = self.resolve_securities(&processed, &mut result);
        let records = self.build_records(
            &processed,
            &accounts,
            &securities,
            &excluded,
            batch_id,
            &mut result,
        );
        self.commit_batches(records, &mut result);

        result.processed = processed;
        info!(
            "Batch {batch_id}: {} created, {} updated, {} skipped, {} error(s)",
            result.created_transactions,
            result.updated_transactions,
            result.skipped_rows,
            result.errors.len()
        );
        Ok(result)
    }

    /// Pre-flight check without touching storage. Never fails; even a
    /// bad configured encoding comes back inside the report.
    pub fn validate_file(&self, bytes: &[u8], filename: &str) -> FileValidation {
        match self.prepare(bytes, filename) {
            Ok(prepared) => FileValidation {
                is_valid: prepared.errors.is_empty(),
                errors: prepared.errors,
                warnings: prepared.warnings,
                encoding: prepared.encoding.name().to_string(),
                delimiter: prepared.delimiter as char,
                headers: prepared.parsed.headers.clone(),
                data_rows: prepared.parsed.rows.len(),
            },
            Err(err) => FileValidation {
                is_valid: false,
                errors: vec![err.to_string()],
                warnings: Vec::new(),
                encoding: String::new(),
                delimiter: ',',
                headers: Vec::new(),
                data_rows: 0,
            },
        }
    }

    /// Contract check, format sniffing, row parsing, and structural
    /// validation. File-level trouble lands in `errors`; only an
    /// unresolvable configured encoding is an `Err`.
    fn prepare(&self, bytes: &[u8], filename: &str) -> Result<PreparedFile, ImportError> {
        let sniffed = detect::sniff_format(bytes, &self.profile.locale, self.config.skip_rows);
        let encoding = match &self.config.encoding_override {
            Some(label) => io_utils::resolve_encoding(label)
                .map_err(|err| ImportError::Config(format!("{err:#}")))?,
            None => sniffed.encoding,
        };
        let delimiter = self.config.delimiter_override.unwrap_or(sniffed.delimiter);
        debug!(
            "Prepared '{filename}': encoding {}, delimiter {:?}",
            encoding.name(),
            delimiter as char
        );

        let mut prepared = PreparedFile {
            encoding,
            delimiter,
            parsed: ParsedRows::default(),
            check: StructureCheck::default(),
            errors: io_utils::input_contract_violations(filename, bytes.len()),
            warnings: Vec::new(),
        };
        if !prepared.errors.is_empty() {
            return Ok(prepared);
        }

        let reader = io_utils::decoded_reader(bytes, encoding);
        match rows::parse_rows(reader, delimiter, self.config.skip_rows) {
            Ok(parsed) => prepared.parsed = parsed,
            Err(err) => {
                prepared.errors.push(format!("{err:#}"));
                return Ok(prepared);
            }
        }
        prepared.warnings.append(&mut prepared.parsed.warnings);

        prepared.check = structure::validate_structure(
            &prepared.parsed.headers,
            &self.profile,
            self.config.header_match_threshold,
        );
        prepared.warnings.extend(prepared.check.warnings.clone());
        if !prepared.check.is_valid {
            prepared.errors.extend(prepared.check.errors.clone());
        }
        Ok(prepared)
    }

    fn resolve_platform(&self) -> Result<PlatformRecord, ImportError> {
        if let Some(platform) = self.store.find_platform(&self.profile.institution)? {
            return Ok(platform);
        }
        let platform = self.store.create_platform(NewPlatform {
            name: self.profile.institution.clone(),
        })?;
        info!("Created platform '{}'", platform.name);
        Ok(platform)
    }

    /// Find-or-create an account per distinct derived account name.
    /// Failures exclude the affected rows but never stop the run.
    fn resolve_accounts(
        &self,
        platform: &PlatformRecord,
        processed: &[TransformedTransaction],
        result: &mut ImportResult,
    ) -> BTreeMap<String, i64> {
        let mut accounts = BTreeMap::new();
        for tx in processed {
            if tx.portfolio.trim().is_empty() || accounts.contains_key(&tx.account_name) {
                continue;
            }
            match self.resolve_account(platform, tx, processed) {
                Ok((account_id, created)) => {
                    if created {
                        result.created_accounts += 1;
                        info!("Created account '{}'", tx.account_name);
                    }
                    accounts.insert(tx.account_name.clone(), account_id);
                }
                Err(err) => result
                    .errors
                    .push(format!("Account '{}': {err}", tx.account_name)),
            }
        }
        accounts
    }

    fn resolve_account(
        &self,
        platform: &PlatformRecord,
        tx: &TransformedTransaction,
        processed: &[TransformedTransaction],
    ) -> Result<(i64, bool), StorageError> {
        let owner = &self.config.owner;
        if let Some(account) = self
            .store
            .find_account(owner, platform.id, &tx.account_name)?
        {
            return Ok((account.id, false));
        }
        let portfolio = match self.store.find_portfolio(owner, &tx.account_name)? {
            Some(portfolio) => portfolio,
            None => self.store.create_portfolio(NewPortfolio {
                owner: owner.clone(),
                name: tx.account_name.clone(),
            })?,
        };
        let currency = dominant_currency(processed, &tx.portfolio)
            .unwrap_or_else(|| self.profile.default_currency.clone());
        let account = self.store.create_account(NewAccount {
            owner: owner.clone(),
            portfolio_id: portfolio.id,
            platform_id: platform.id,
            name: tx.account_name.clone(),
            account_type: account_type_for(&tx.portfolio),
            currency,
        })?;
        Ok((account.id, true))
    }

    /// Find-or-create a security per distinct ISIN among importable
    /// needs-security rows. Returns the resolved map plus the ISINs
    /// excluded because creation is disabled.
    fn resolve_securities(
        &self,
        processed: &[TransformedTransaction],
        result: &mut ImportResult,
    ) -> (BTreeMap<String, i64>, BTreeSet<String>) {
        let mut securities = BTreeMap::new();
        let mut excluded = BTreeSet::new();
        for tx in processed {
            if !tx.is_importable() || !tx.needs_security {
                continue;
            }
            let Some(isin) = tx.isin.as_deref() else {
                continue;
            };
            if securities.contains_key(isin) || excluded.contains(isin) {
                continue;
            }
            match self.store.find_security(isin) {
                Ok(Some(record)) => {
                    securities.insert(isin.to_string(), record.id);
                }
                Ok(None) if self.config.create_missing_securities => {
                    let name = tx
                        .security_name
                        .clone()
                        .unwrap_or_else(|| isin.to_string());
                    let created = self.store.create_security(NewSecurity {
                        symbol: synthesize_symbol(&name, isin),
                        name,
                        isin: Some(isin.to_string()),
                        currency: tx
                            .currency
                            .clone()
                            .unwrap_or_else(|| self.profile.default_currency.clone()),
                    });
                    match created {
                        Ok(record) => {
                            result.created_securities += 1;
                            info!("Created security '{}' for {isin}", record.symbol);
                            securities.insert(isin.to_string(), record.id);
                        }
                        Err(err) => result.errors.push(format!("Security {isin}: {err}")),
                    }
                }
                Ok(None) => {
                    result.warnings.push(format!(
                        "Unknown security {isin} and security creation is disabled; rows skipped"
                    ));
                    excluded.insert(isin.to_string());
                }
                Err(err) => result.errors.push(format!("Security {isin}: {err}")),
            }
        }
        (securities, excluded)
    }

    /// Turns importable rows with resolved references into storage
    /// records. Rows that lost their account or security along the way
    /// drop out here.
    fn build_records(
        &self,
        processed: &[TransformedTransaction],
        accounts: &BTreeMap<String, i64>,
        securities: &BTreeMap<String, i64>,
        excluded: &BTreeSet<String>,
        batch_id: Uuid,
        result: &mut ImportResult,
    ) -> Vec<NewTransaction> {
        let mut records = Vec::new();
        for tx in processed {
            if !tx.is_importable() {
                continue;
            }
            let Some(account_id) = accounts.get(&tx.account_name).copied() else {
                result.errors.push(format!(
                    "Line {} [{}]: No account resolved for '{}'",
                    tx.line, tx.external_id, tx.account_name
                ));
                continue;
            };
            let security_id = match (tx.needs_security, tx.isin.as_deref()) {
                (true, None) => {
                    result.errors.push(format!(
                        "Line {} [{}]: {} row has no security identifier",
                        tx.line,
                        tx.external_id,
                        tx.kind.as_str()
                    ));
                    continue;
                }
                (true, Some(isin)) if excluded.contains(isin) => {
                    result.skipped_rows += 1;
                    continue;
                }
                (true, Some(isin)) => match securities.get(isin).copied() {
                    Some(id) => Some(id),
                    None => continue,
                },
                (false, isin) => isin.and_then(|i| securities.get(i)).copied(),
            };
            let Some(booking_date) = tx.booking_date else {
                result.errors.push(format!(
                    "Line {} [{}]: No booking date to store",
                    tx.line, tx.external_id
                ));
                continue;
            };
            let Some(amount) = tx.amount else {
                result.errors.push(format!(
                    "Line {} [{}]: No amount to store",
                    tx.line, tx.external_id
                ));
                continue;
            };
            records.push(NewTransaction {
                owner: self.config.owner.clone(),
                account_id,
                security_id,
                batch_id,
                external_id: tx.external_id.clone(),
                kind: tx.kind,
                booking_date,
                trade_date: tx.trade_date,
                settlement_date: tx.settlement_date,
                quantity: tx.quantity,
                price: tx.price,
                amount,
                fees: tx.fees,
                currency: tx
                    .currency
                    .clone()
                    .unwrap_or_else(|| self.profile.default_currency.clone()),
                note: tx.note.clone(),
            });
        }
        records
    }

    /// Sequential fixed-size batches. A failing batch is recorded with
    /// its index and the remaining batches still run.
    fn commit_batches(&self, records: Vec<NewTransaction>, result: &mut ImportResult) {
        let chunks = records.into_iter().chunks(BATCH_SIZE);
        for (batch_index, chunk) in chunks.into_iter().enumerate() {
            let batch: Vec<NewTransaction> = chunk.collect();
            let ids: Vec<String> = batch.iter().map(|t| t.external_id.clone()).collect();
            let existing: BTreeSet<String> = match self
                .store
                .find_transactions_by_external_id(&self.config.owner, &ids)
            {
                Ok(found) => found.into_iter().collect(),
                Err(err) => {
                    result
                        .errors
                        .push(format!("Batch {batch_index}: dedup lookup failed: {err}"));
                    continue;
                }
            };
            let (duplicates, fresh): (Vec<NewTransaction>, Vec<NewTransaction>) = batch
                .into_iter()
                .partition(|t| existing.contains(&t.external_id));

            match self.config.duplicate_handling {
                DuplicateHandling::Skip => {
                    result.skipped_rows += duplicates.len();
                    if fresh.is_empty() {
                        debug!("Batch {batch_index}: all rows already imported");
                        continue;
                    }
                }
                DuplicateHandling::Update => {
                    if !duplicates.is_empty() {
                        match self.store.update_transactions(&duplicates) {
                            Ok(count) => result.updated_transactions += count,
                            Err(err) => result
                                .errors
                                .push(format!("Batch {batch_index}: update failed: {err}")),
                        }
                    }
                }
                DuplicateHandling::Error => {
                    for duplicate in &duplicates {
                        result.errors.push(format!(
                            "Duplicate transaction '{}' already imported",
                            duplicate.external_id
                        ));
                    }
                }
            }
            if fresh.is_empty() {
                continue;
            }
            match self.store.insert_transactions(&fresh) {
                Ok(inserted) => result.created_transactions += inserted.len(),
                Err(err) => result
                    .errors
                    .push(format!("Batch {batch_index}: insert failed: {err}")),
            }
        }
    }
}

/// Account flavor from the broker's portfolio naming conventions.
pub fn account_type_for(portfolio: &str) -> AccountType {
    let lowered = portfolio.to_lowercase();
    if lowered.contains("aksjesparekonto") || lowered.split_whitespace().any(|t| t == "ask") {
        AccountType::StockSavings
    } else if lowered.contains("pensjon") || lowered.split_whitespace().any(|t| t == "ips") {
        AccountType::Pension
    } else {
        AccountType::Brokerage
    }
}

fn dominant_currency(processed: &[TransformedTransaction], portfolio: &str) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for tx in processed {
        if tx.portfolio == portfolio {
            if let Some(currency) = tx.currency.as_deref() {
                *counts.entry(currency).or_default() += 1;
            }
        }
    }
    counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(currency, _)| currency.to_string())
}

fn synthesize_symbol(name: &str, isin: &str) -> String {
    symbol_token()
        .find(name)
        .map(|found| found.as_str().to_uppercase())
        .unwrap_or_else(|| isin.get(2..8).unwrap_or(isin).to_string())
}
