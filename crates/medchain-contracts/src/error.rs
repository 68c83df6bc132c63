//! Error types for the medchain ledger.
//!
//! All fallible ledger operations return `ChainResult<T>`.  A broken chain is
//! NOT an error: `verify()` reports corruption through
//! `VerificationResult::Invalid`, because finding it is the expected outcome
//! of an integrity check.

use thiserror::Error;

/// The unified error type for the medchain crates.
#[derive(Debug, Error)]
pub enum ChainError {
    /// Concurrent appends kept claiming the same tail position and the
    /// bounded retry budget ran out.
    ///
    /// Recoverable: the caller may retry the whole append from scratch.
    #[error("chain contention: append lost the race for the tail {attempts} time(s)")]
    ChainContention { attempts: u32 },

    /// The storage adapter could not complete a read or write.
    ///
    /// Never retried by the ledger; surfaced to the caller immediately.
    #[error("storage unavailable: {reason}")]
    StorageUnavailable { reason: String },

    /// `verify()` was asked for a range outside the chain, or `from > to`.
    #[error("invalid verification range {from}..={to}: {reason}")]
    InvalidRange { from: u64, to: u64, reason: String },

    /// An administration request failed validation before reaching the ledger.
    #[error("invalid administration payload: {reason}")]
    InvalidPayload { reason: String },

    /// A configuration value is missing or malformed.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },

    /// The caller cancelled a verification scan before it finished.
    #[error("verification cancelled after {records_checked} record(s)")]
    VerificationCancelled { records_checked: u64 },

    /// A verification scan exceeded its deadline.
    #[error("verification timed out after {timeout_ms} ms ({records_checked} record(s) checked)")]
    VerificationTimedOut { records_checked: u64, timeout_ms: u64 },
}

/// Convenience alias used throughout the medchain crates.
pub type ChainResult<T> = Result<T, ChainError>;
