//! The storage adapter contract.
//!
//! The ledger never owns durable state.  It reads the tail, reads ranges,
//! and asks the store to append one fully sealed record at a time.  The
//! only atomic primitive required is "append at sequence N succeeds for
//! exactly one caller"; everything else is plain reads.

use medchain_contracts::{error::ChainResult, record::AdministrationRecord};

/// Outcome of a conditional append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The record was persisted at its sequence number.
    Appended,

    /// Another record already holds that sequence number, or the record
    /// does not extend the current tail.  Nothing was written.
    Conflict,
}

/// Durable, append-only storage for administration records.
///
/// Implementations must be safe to share between threads and must never
/// overwrite an existing sequence number.
pub trait RecordStore: Send + Sync {
    /// The record with the highest sequence number, or `None` if empty.
    fn tail(&self) -> ChainResult<Option<AdministrationRecord>>;

    /// Records with `from <= sequence_number <= to`, in strictly ascending
    /// order.
    ///
    /// Gaps are returned as gaps; the verifier is responsible for noticing.
    fn range(&self, from: u64, to: u64) -> ChainResult<Vec<AdministrationRecord>>;

    /// Persist `record` only if its sequence number is exactly one past the
    /// current tail (or the genesis sequence on an empty store).
    ///
    /// Of several concurrent calls for the same sequence number exactly one
    /// returns `Appended`; the rest return `Conflict`.  Storage failures are
    /// `Err(StorageUnavailable)`, never `Conflict`.
    fn append_atomic(&self, record: &AdministrationRecord) -> ChainResult<AppendOutcome>;
}
