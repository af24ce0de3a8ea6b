//! Brokerage CSV import pipeline for a personal portfolio tracker.
//!
//! Turns a locale-specific, possibly mis-encoded institution export
//! into validated, deduplicated transaction records behind a storage
//! trait. The stages run strictly forward:
//!
//! 1. encoding and delimiter detection (`detect`)
//! 2. row parsing (`rows`)
//! 3. structural validation of the header (`structure`)
//! 4. field mapping and type coercion (`mapper`, `values`)
//! 5. business rules (`validate`)
//! 6. batched persistence with dedup (`import`)
//!
//! Rows carry their own errors and warnings through the pipeline; a
//! row with errors is reported but never persisted. Only configuration
//! errors and platform-level storage failures abort a run.
//!
//! ```no_run
//! use std::sync::Arc;
//! use broker_import::{ImportConfig, Importer, MappingProfile, MemoryStore};
//!
//! # fn main() -> Result<(), broker_import::ImportError> {
//! let store = Arc::new(MemoryStore::new());
//! let importer = Importer::new(
//!     store,
//!     MappingProfile::nordnet(),
//!     ImportConfig::for_owner("alice"),
//! )?;
//! let result = importer.import_path("transactions.csv".as_ref())?;
//! println!("created {} transactions", result.created_transactions);
//! # Ok(())
//! # }
//! ```

pub mod detect;
pub mod error;
pub mod import;
pub mod io_utils;
pub mod mapper;
pub mod mapping;
pub mod model;
pub mod report;
pub mod rows;
pub mod storage;
pub mod structure;
pub mod validate;
pub mod values;

pub use error::{ImportError, StorageError};
pub use import::{BATCH_SIZE, Importer};
pub use mapping::{FieldMapping, MappingProfile, ProfileRegistry};
pub use model::{DuplicateHandling, ImportConfig, TransactionKind, TransformedTransaction};
pub use report::{FileValidation, ImportResult};
pub use storage::{MemoryStore, PortfolioStore};
