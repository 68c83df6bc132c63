//! # medchain-core
//!
//! The tamper-evident ledger for medication-administration records.
//!
//! This crate provides:
//! - The `RecordStore` trait every storage adapter implements
//! - Canonical serialization and SHA-256 chaining (`chain`)
//! - The `HashChainLedger` that appends, verifies, and exports
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use medchain_core::{HashChainLedger, LedgerConfig};
//! use medchain_store::InMemoryRecordStore;
//!
//! let ledger = HashChainLedger::new(Arc::new(InMemoryRecordStore::new()), LedgerConfig::default());
//! let record = ledger.append(payload)?;
//! assert!(ledger.verify(None)?.is_valid());
//! ```

pub mod cancel;
pub mod chain;
pub mod config;
pub mod ledger;
pub mod traits;

pub use cancel::CancelToken;
pub use config::LedgerConfig;
pub use ledger::HashChainLedger;
pub use traits::{AppendOutcome, RecordStore};
