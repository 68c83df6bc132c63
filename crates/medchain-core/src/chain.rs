//! Canonical serialization, hashing, and per-record chain checks.
//!
//! Hash input layout, format version 1 (bytes, in order):
//!   1. format version, 1 byte
//!   2. sequence_number as u64 big-endian
//!   3. record_id as 16 raw UUID bytes
//!   4. patient_id, order_id, administered_by: each u64 big-endian length
//!      followed by the UTF-8 bytes
//!   5. patient_barcode_scanned, medication_barcode_scanned: 1 byte each
//!   6. administered_at as i64 big-endian Unix seconds, then u32 big-endian
//!      sub-second nanoseconds
//!   7. previous_hash as UTF-8 bytes (64 ASCII hex chars)
//!
//! Fields 1-6 are the canonical serialization; field 7 is the link.  Any
//! change to this layout must bump `CANONICAL_FORMAT_VERSION`, because
//! existing chains would no longer verify.

use sha2::{Digest, Sha256};

use medchain_contracts::{
    record::{AdministrationRecord, RecordPayload},
    verify::{BreakReason, ChainExport, VerificationResult},
};

/// Version tag written as the first canonical byte.
pub const CANONICAL_FORMAT_VERSION: u8 = 1;

fn put_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u64).to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
}

/// The canonical byte encoding of a record's hashed fields.
///
/// Length prefixes keep adjacent strings from sliding into each other
/// ("P1" + "2" never encodes the same as "P" + "12").
pub fn canonical_bytes(sequence_number: u64, payload: &RecordPayload) -> Vec<u8> {
    let mut buf = Vec::with_capacity(
        64 + payload.patient_id.len() + payload.order_id.len() + payload.administered_by.len(),
    );

    buf.push(CANONICAL_FORMAT_VERSION);
    buf.extend_from_slice(&sequence_number.to_be_bytes());
    buf.extend_from_slice(payload.record_id.as_bytes());
    put_str(&mut buf, &payload.patient_id);
    put_str(&mut buf, &payload.order_id);
    put_str(&mut buf, &payload.administered_by);
    buf.push(u8::from(payload.patient_barcode_scanned));
    buf.push(u8::from(payload.medication_barcode_scanned));
    buf.extend_from_slice(&payload.administered_at.timestamp().to_be_bytes());
    buf.extend_from_slice(&payload.administered_at.timestamp_subsec_nanos().to_be_bytes());

    buf
}

/// Compute the SHA-256 record hash for a payload at a chain position.
///
/// Returns a lowercase 64-character hex string.
pub fn hash_record(sequence_number: u64, payload: &RecordPayload, previous_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_bytes(sequence_number, payload));
    hasher.update(previous_hash.as_bytes());
    hex::encode(hasher.finalize())
}

/// Build the immutable record for `payload` at `sequence_number`, linked to
/// `previous_hash`.
pub fn seal_record(
    sequence_number: u64,
    payload: RecordPayload,
    previous_hash: String,
) -> AdministrationRecord {
    let record_hash = hash_record(sequence_number, &payload, &previous_hash);
    AdministrationRecord {
        sequence_number,
        payload,
        previous_hash,
        record_hash,
    }
}

/// Check one record against the running chain state.
///
/// Returns the sequence number to report and the reason on failure.
///
/// Link is checked before content: when record k is deleted, its successor
/// fails here as a broken link at k+1, not as a hash mismatch.  A record
/// whose link holds but whose hash does not is reported at the position it
/// occupies in the chain, since its own `sequence_number` may be the edited
/// field.
pub fn check_record(
    record: &AdministrationRecord,
    expected_previous_hash: &str,
    expected_sequence: u64,
) -> Option<(u64, BreakReason)> {
    if record.previous_hash != expected_previous_hash {
        return Some((record.sequence_number, BreakReason::BrokenLink));
    }

    let recomputed = hash_record(record.sequence_number, &record.payload, &record.previous_hash);
    if record.record_hash != recomputed {
        return Some((expected_sequence, BreakReason::HashMismatch));
    }

    if record.sequence_number > expected_sequence {
        return Some((expected_sequence, BreakReason::MissingRecord));
    }
    if record.sequence_number < expected_sequence {
        return Some((record.sequence_number, BreakReason::BrokenLink));
    }

    None
}

/// Verify a contiguous slice of records held in memory.
///
/// `seed_hash` is what the first record's `previous_hash` must equal
/// (`GENESIS_HASH` for a slice that starts at the genesis sequence) and
/// `first_sequence` is the sequence number it must carry.  An empty slice
/// is valid.
pub fn verify_records(
    records: &[AdministrationRecord],
    seed_hash: &str,
    first_sequence: u64,
) -> VerificationResult {
    let mut expected_prev = seed_hash.to_string();
    let mut expected_seq = first_sequence;
    let mut checked = 0u64;

    for record in records {
        if let Some((at, reason)) = check_record(record, &expected_prev, expected_seq) {
            return VerificationResult::Invalid {
                first_broken_sequence_number: at,
                reason,
                records_checked: checked,
            };
        }
        expected_prev = record.record_hash.clone();
        expected_seq = record.sequence_number + 1;
        checked += 1;
    }

    VerificationResult::Valid {
        records_checked: checked,
    }
}

/// Verify a `ChainExport` offline, including its terminal anchor.
///
/// The records must chain from `seed_hash`, and the last one must carry
/// `terminal_hash`.  A snapshot whose trailing records were cut off still
/// links internally, so a terminal mismatch is reported as a missing record
/// at the first position after the records that are present.
pub fn verify_export(export: &ChainExport) -> VerificationResult {
    let result = verify_records(&export.records, &export.seed_hash, export.from_sequence);
    if !result.is_valid() {
        return result;
    }

    let last_hash = export.records.last().map_or("", |r| r.record_hash.as_str());
    if last_hash == export.terminal_hash {
        return result;
    }

    let records_checked = result.records_checked();
    VerificationResult::Invalid {
        first_broken_sequence_number: export.from_sequence + records_checked,
        reason: BreakReason::MissingRecord,
        records_checked,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
