//! # medchain-store
//!
//! Storage adapters for the medchain ledger.
//!
//! ## Overview
//!
//! - [`InMemoryRecordStore`]: reference implementation, process-local.
//! - [`JsonlRecordStore`]: durable append-only JSON Lines file.
//!
//! Both accept an append only when it extends the current tail by exactly
//! one sequence number, which is the single atomic primitive
//! `HashChainLedger` relies on.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use medchain_core::{HashChainLedger, LedgerConfig};
//! use medchain_store::JsonlRecordStore;
//!
//! let store = Arc::new(JsonlRecordStore::open("medchain.jsonl")?);
//! let ledger = HashChainLedger::new(store, LedgerConfig::default());
//! ```

pub mod file;
pub mod memory;

pub use file::JsonlRecordStore;
pub use memory::InMemoryRecordStore;

// ── Tests ─────────────────────────────────────────────────────────────────────
