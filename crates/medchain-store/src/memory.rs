//! In-memory implementation of `RecordStore`.
//!
//! `InMemoryRecordStore` is the reference adapter.  Records live in a
//! `BTreeMap` keyed by sequence number behind a `Mutex`, so range reads come
//! back ordered and the tail check plus insert in `append_atomic` happen
//! under one lock.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use medchain_contracts::{
    error::{ChainError, ChainResult},
    record::{AdministrationRecord, GENESIS_SEQUENCE},
};
use medchain_core::traits::{AppendOutcome, RecordStore};

// ── Internal mutable state ────────────────────────────────────────────────────

pub(crate) struct InMemoryState {
    /// Every appended record, keyed by `sequence_number`.
    pub(crate) records: BTreeMap<u64, AdministrationRecord>,
}

// ── Public store ──────────────────────────────────────────────────────────────

/// An in-memory, append-only record store.
///
/// Clones share the same records.
#[derive(Clone)]
pub struct InMemoryRecordStore {
    pub(crate) state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(InMemoryState {
                records: BTreeMap::new(),
            })),
        }
    }

    /// Number of stored records.
    pub fn len(&self) -> ChainResult<usize> {
        Ok(self.lock()?.records.len())
    }

    pub fn is_empty(&self) -> ChainResult<bool> {
        Ok(self.lock()?.records.is_empty())
    }

    /// Every stored record in sequence order.
    pub fn snapshot(&self) -> ChainResult<Vec<AdministrationRecord>> {
        Ok(self.lock()?.records.values().cloned().collect())
    }

    fn lock(&self) -> ChainResult<MutexGuard<'_, InMemoryState>> {
        self.state.lock().map_err(|e| ChainError::StorageUnavailable {
            reason: format!("record store lock poisoned: {}", e),
        })
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

// ── RecordStore impl ──────────────────────────────────────────────────────────

impl RecordStore for InMemoryRecordStore {
    fn tail(&self) -> ChainResult<Option<AdministrationRecord>> {
        Ok(self.lock()?.records.values().next_back().cloned())
    }

    fn range(&self, from: u64, to: u64) -> ChainResult<Vec<AdministrationRecord>> {
        if from > to {
            return Ok(Vec::new());
        }
        Ok(self.lock()?.records.range(from..=to).map(|(_, r)| r.clone()).collect())
    }

    /// Insert `record` if it extends the tail by exactly one.
    fn append_atomic(&self, record: &AdministrationRecord) -> ChainResult<AppendOutcome> {
        let mut state = self.lock()?;

        let next = state
            .records
            .keys()
            .next_back()
            .map(|seq| seq + 1)
            .unwrap_or(GENESIS_SEQUENCE);

        if record.sequence_number != next {
            debug!(
                sequence = record.sequence_number,
                expected = next,
                "rejecting append that does not extend the tail"
            );
            return Ok(AppendOutcome::Conflict);
        }

        state.records.insert(record.sequence_number, record.clone());
        Ok(AppendOutcome::Appended)
    }
}
