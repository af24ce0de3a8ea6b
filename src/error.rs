//! Error taxonomy for the import pipeline.
//!
//! Only failures that abort an entire run surface as `Err`; file-, row-,
//! and batch-level problems travel as data inside the stage reports.

use thiserror::Error;

/// Aborts the whole import invocation. Everything recoverable is
/// accumulated in [`crate::report::ImportResult`] instead.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Invalid import configuration: {0}")]
    Config(String),

    #[error("Storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to read input: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by a [`crate::storage::PortfolioStore`] backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{entity} '{key}' not found")]
    NotFound { entity: &'static str, key: String },

    #[error("{entity} '{key}' already exists")]
    Conflict { entity: &'static str, key: String },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}
