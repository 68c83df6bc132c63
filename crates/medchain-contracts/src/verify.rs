//! Verification ranges, results, and chain exports.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::AdministrationRecord;

/// An inclusive range of sequence numbers to verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyRange {
    pub from: u64,
    pub to: u64,
}

impl VerifyRange {
    pub fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }
}

/// Why verification stopped at a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakReason {
    /// The stored `record_hash` does not match the recomputed one: content
    /// was altered after append.
    #[serde(rename = "hash mismatch")]
    HashMismatch,

    /// The stored `previous_hash` does not match the predecessor: a record
    /// was deleted, inserted, or reordered.
    #[serde(rename = "broken link")]
    BrokenLink,

    /// A sequence number expected in the chain is absent.
    #[serde(rename = "missing record")]
    MissingRecord,
}

impl BreakReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakReason::HashMismatch => "hash mismatch",
            BreakReason::BrokenLink => "broken link",
            BreakReason::MissingRecord => "missing record",
        }
    }
}

impl fmt::Display for BreakReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of an integrity check.
///
/// `Invalid` is a normal return value, not an error.  Only the first break
/// in ascending order is reported; nothing after it can be trusted anyway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationResult {
    Valid {
        records_checked: u64,
    },
    Invalid {
        first_broken_sequence_number: u64,
        reason: BreakReason,
        /// Records that passed before the break.
        records_checked: u64,
    },
}

impl VerificationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, VerificationResult::Valid { .. })
    }

    pub fn records_checked(&self) -> u64 {
        match self {
            VerificationResult::Valid { records_checked }
            | VerificationResult::Invalid { records_checked, .. } => *records_checked,
        }
    }
}

/// A sealed snapshot of a slice of the chain, for off-box audit.
///
/// `seed_hash` is the `previous_hash` the first exported record must link
/// to; `terminal_hash` is the `record_hash` of the last one and commits to
/// the whole slice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainExport {
    /// Sequence number of the first exported record.
    pub from_sequence: u64,

    /// Expected `previous_hash` of the first record.
    pub seed_hash: String,

    /// Exported records in ascending sequence order.
    pub records: Vec<AdministrationRecord>,

    pub exported_at: DateTime<Utc>,

    /// `record_hash` of the last record.  Empty string if nothing was exported.
    pub terminal_hash: String,
}
