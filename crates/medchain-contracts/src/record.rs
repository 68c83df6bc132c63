//! Medication-administration records.
//!
//! `RecordPayload` is what a caller hands to the ledger.  `AdministrationRecord`
//! is what the ledger persists: the payload plus its chain position and the
//! two hashes that bind it to its predecessor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sequence number of the first record in every chain.
pub const GENESIS_SEQUENCE: u64 = 1;

/// The `previous_hash` of the genesis record: 64 hex zeros.
///
/// Never the SHA-256 of real data, so the start of a chain is unambiguous.
pub const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// The caller-supplied fields of one administration event.
///
/// Identifiers are opaque to the ledger; they are hashed byte-for-byte and
/// never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPayload {
    /// Domain-level identifier of the record, independent of its position.
    pub record_id: Uuid,

    pub patient_id: String,

    /// The medication order being administered.
    pub order_id: String,

    /// Staff member who administered the dose.
    pub administered_by: String,

    pub patient_barcode_scanned: bool,

    pub medication_barcode_scanned: bool,

    /// When the dose was given (UTC).  Hashed, so retroactive edits show up.
    pub administered_at: DateTime<Utc>,
}

/// A sealed entry in the administration hash chain.
///
/// Created exactly once by the ledger at append time and never updated.
/// Changing any payload field invalidates `record_hash`; deleting or
/// reordering entries breaks the `previous_hash` links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdministrationRecord {
    /// Position in the chain, starting at `GENESIS_SEQUENCE`, gap-free.
    pub sequence_number: u64,

    #[serde(flatten)]
    pub payload: RecordPayload,

    /// `record_hash` of the record at `sequence_number - 1`, or `GENESIS_HASH`.
    pub previous_hash: String,

    /// Lowercase hex SHA-256 over the canonical bytes of this record and
    /// `previous_hash`.
    pub record_hash: String,
}

impl AdministrationRecord {
    /// True if this record claims to be the first in its chain.
    pub fn is_genesis(&self) -> bool {
        self.sequence_number == GENESIS_SEQUENCE
    }
}
