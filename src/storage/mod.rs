//! Storage boundary of the pipeline. The importer only ever talks to
//! [`PortfolioStore`]; the bundled [`MemoryStore`] backs tests and
//! gives embedders a reference for wiring a real database.

pub mod memory;

pub use memory::MemoryStore;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{error::StorageError, model::TransactionKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformRecord {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct NewPlatform {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortfolioRecord {
    pub id: i64,
    pub owner: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct NewPortfolio {
    pub owner: String,
    pub name: String,
}

/// Account flavor inferred from the broker's portfolio naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountType {
    Brokerage,
    StockSavings,
    Pension,
}

impl AccountType {
    pub fn as_str(self) -> &'static str {
        match self {
            AccountType::Brokerage => "BROKERAGE",
            AccountType::StockSavings => "STOCK_SAVINGS",
            AccountType::Pension => "PENSION",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRecord {
    pub id: i64,
    pub owner: String,
    pub portfolio_id: i64,
    pub platform_id: i64,
    pub name: String,
    pub account_type: AccountType,
    pub currency: String,
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub owner: String,
    pub portfolio_id: i64,
    pub platform_id: i64,
    pub name: String,
    pub account_type: AccountType,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityRecord {
    pub id: i64,
    pub symbol: String,
    pub name: String,
    pub isin: Option<String>,
    pub currency: String,
}

#[derive(Debug, Clone)]
pub struct NewSecurity {
    pub symbol: String,
    pub name: String,
    pub isin: Option<String>,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    pub id: i64,
    pub owner: String,
    pub account_id: i64,
    pub security_id: Option<i64>,
    pub batch_id: Uuid,
    pub external_id: String,
    pub kind: TransactionKind,
    pub booking_date: NaiveDate,
    pub trade_date: Option<NaiveDate>,
    pub settlement_date: Option<NaiveDate>,
    pub quantity: Option<Decimal>,
    pub price: Option<Decimal>,
    pub amount: Decimal,
    pub fees: Option<Decimal>,
    pub currency: String,
    pub note: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub owner: String,
    pub account_id: i64,
    pub security_id: Option<i64>,
    pub batch_id: Uuid,
    pub external_id: String,
    pub kind: TransactionKind,
    pub booking_date: NaiveDate,
    pub trade_date: Option<NaiveDate>,
    pub settlement_date: Option<NaiveDate>,
    pub quantity: Option<Decimal>,
    pub price: Option<Decimal>,
    pub amount: Decimal,
    pub fees: Option<Decimal>,
    pub currency: String,
    pub note: Option<String>,
}

/// Everything the importer needs from a backing store. Implementations
/// must treat (owner, external id) as a unique transaction key.
pub trait PortfolioStore: Send + Sync {
    fn find_platform(&self, name: &str) -> Result<Option<PlatformRecord>, StorageError>;
    fn create_platform(&self, platform: NewPlatform) -> Result<PlatformRecord, StorageError>;

    fn find_portfolio(&self, owner: &str, name: &str)
    -> Result<Option<PortfolioRecord>, StorageError>;
    fn create_portfolio(&self, portfolio: NewPortfolio) -> Result<PortfolioRecord, StorageError>;

    fn find_account(
        &self,
        owner: &str,
        platform_id: i64,
        name: &str,
    ) -> Result<Option<AccountRecord>, StorageError>;
    fn create_account(&self, account: NewAccount) -> Result<AccountRecord, StorageError>;

    fn find_security(&self, isin: &str) -> Result<Option<SecurityRecord>, StorageError>;
    fn create_security(&self, security: NewSecurity) -> Result<SecurityRecord, StorageError>;

    /// Returns the subset of `external_ids` already stored for `owner`.
    fn find_transactions_by_external_id(
        &self,
        owner: &str,
        external_ids: &[String],
    ) -> Result<Vec<String>, StorageError>;

    /// Inserts a batch atomically: any key conflict fails the whole
    /// call and leaves the store untouched.
    fn insert_transactions(
        &self,
        transactions: &[NewTransaction],
    ) -> Result<Vec<i64>, StorageError>;

    /// Rewrites stored rows matched by (owner, external id), keeping
    /// their storage ids. Returns how many rows changed.
    fn update_transactions(&self, transactions: &[NewTransaction])
    -> Result<usize, StorageError>;
}
