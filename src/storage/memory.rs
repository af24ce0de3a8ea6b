//! In-process reference store. Backs the test suite and dry runs;
//! real applications wire their own database behind the same trait.

use std::{
    collections::BTreeSet,
    sync::{Mutex, MutexGuard},
};

use crate::error::StorageError;

use super::{
    AccountRecord, NewAccount, NewPlatform, NewPortfolio, NewSecurity, NewTransaction,
    PlatformRecord, PortfolioRecord, PortfolioStore, SecurityRecord, TransactionRecord,
};

#[derive(Default)]
struct State {
    platforms: Vec<PlatformRecord>,
    portfolios: Vec<PortfolioRecord>,
    accounts: Vec<AccountRecord>,
    securities: Vec<SecurityRecord>,
    transactions: Vec<TransactionRecord>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Mutex-guarded in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transactions(&self) -> Vec<TransactionRecord> {
        self.lock().transactions.clone()
    }

    pub fn accounts(&self) -> Vec<AccountRecord> {
        self.lock().accounts.clone()
    }

    pub fn securities(&self) -> Vec<SecurityRecord> {
        self.lock().securities.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("store mutex poisoned")
    }
}

fn materialize(tx: &NewTransaction, id: i64) -> TransactionRecord {
    TransactionRecord {
        id,
        owner: tx.owner.clone(),
        account_id: tx.account_id,
        security_id: tx.security_id,
        batch_id: tx.batch_id,
        external_id: tx.external_id.clone(),
        kind: tx.kind,
        booking_date: tx.booking_date,
        trade_date: tx.trade_date,
        settlement_date: tx.settlement_date,
        quantity: tx.quantity,
        price: tx.price,
        amount: tx.amount,
        fees: tx.fees,
        currency: tx.currency.clone(),
        note: tx.note.clone(),
    }
}

impl PortfolioStore for MemoryStore {
    fn find_platform(&self, name: &str) -> Result<Option<PlatformRecord>, StorageError> {
        Ok(self
            .lock()
            .platforms
            .iter()
            .find(|p| p.name == name)
            .cloned())
    }

    fn create_platform(&self, platform: NewPlatform) -> Result<PlatformRecord, StorageError> {
        let mut state = self.lock();
        if state.platforms.iter().any(|p| p.name == platform.name) {
            return Err(StorageError::Conflict {
                entity: "platform",
                key: platform.name,
            });
        }
        let record = PlatformRecord {
            id: state.next_id(),
            name: platform.name,
        };
        state.platforms.push(record.clone());
        Ok(record)
    }

    fn find_portfolio(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<Option<PortfolioRecord>, StorageError> {
        Ok(self
            .lock()
            .portfolios
            .iter()
            .find(|p| p.owner == owner && p.name == name)
            .cloned())
    }

    fn create_portfolio(&self, portfolio: NewPortfolio) -> Result<PortfolioRecord, StorageError> {
        let mut state = self.lock();
        let record = PortfolioRecord {
            id: state.next_id(),
            owner: portfolio.owner,
            name: portfolio.name,
        };
        state.portfolios.push(record.clone());
        Ok(record)
    }

    fn find_account(
        &self,
        owner: &str,
        platform_id: i64,
        name: &str,
    ) -> Result<Option<AccountRecord>, StorageError> {
        Ok(self
            .lock()
            .accounts
            .iter()
            .find(|a| a.owner == owner && a.platform_id == platform_id && a.name == name)
            .cloned())
    }

    fn create_account(&self, account: NewAccount) -> Result<AccountRecord, StorageError> {
        let mut state = self.lock();
        let record = AccountRecord {
            id: state.next_id(),
            owner: account.owner,
            portfolio_id: account.portfolio_id,
            platform_id: account.platform_id,
            name: account.name,
            account_type: account.account_type,
            currency: account.currency,
        };
        state.accounts.push(record.clone());
        Ok(record)
    }

    fn find_security(&self, isin: &str) -> Result<Option<SecurityRecord>, StorageError> {
        Ok(self
            .lock()
            .securities
            .iter()
            .find(|s| s.isin.as_deref() == Some(isin))
            .cloned())
    }

    fn create_security(&self, security: NewSecurity) -> Result<SecurityRecord, StorageError> {
        let mut state = self.lock();
        let record = SecurityRecord {
            id: state.next_id(),
            symbol: security.symbol,
            name: security.name,
            isin: security.isin,
            currency: security.currency,
        };
        state.securities.push(record.clone());
        Ok(record)
    }

    fn find_transactions_by_external_id(
        &self,
        owner: &str,
        external_ids: &[String],
    ) -> Result<Vec<String>, StorageError> {
        let state = self.lock();
        Ok(external_ids
            .iter()
            .filter(|id| {
                state
                    .transactions
                    .iter()
                    .any(|t| t.owner == owner && &t.external_id == *id)
            })
            .cloned()
            .collect())
    }

    fn insert_transactions(
        &self,
        transactions: &[NewTransaction],
    ) -> Result<Vec<i64>, StorageError> {
        let mut state = self.lock();
        let mut seen = BTreeSet::new();
        for tx in transactions {
            let stored = state
                .transactions
                .iter()
                .any(|t| t.owner == tx.owner && t.external_id == tx.external_id);
            if stored || !seen.insert((tx.owner.as_str(), tx.external_id.as_str())) {
                return Err(StorageError::Conflict {
                    entity: "transaction",
                    key: tx.external_id.clone(),
                });
            }
        }
        let mut ids = Vec::with_capacity(transactions.len());
        for tx in transactions {
            let id = state.next_id();
            state.transactions.push(materialize(tx, id));
            ids.push(id);
        }
        Ok(ids)
    }

    fn update_transactions(
        &self,
        transactions: &[NewTransaction],
    ) -> Result<usize, StorageError> {
        let mut state = self.lock();
        let mut updated = 0;
        for tx in transactions {
            let Some(index) = state
                .transactions
                .iter()
                .position(|t| t.owner == tx.owner && t.external_id == tx.external_id)
            else {
                return Err(StorageError::NotFound {
                    entity: "transaction",
                    key: tx.external_id.clone(),
                });
            };
            let id = state.transactions[index].id;
            state.transactions[index] = materialize(tx, id);
            updated += 1;
        }
        Ok(updated)
    }
}
