//! Response bodies for the administer and chain-verify endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use medchain_contracts::{
    record::{AdministrationRecord, GENESIS_SEQUENCE},
    verify::{VerificationResult, VerifyRange},
};

/// What `POST /api/medications/administer` returns for a persisted record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdministrationResponse {
    pub record_id: Uuid,
    pub chain_sequence: u64,
    pub order_id: String,
    pub patient_id: String,
    pub administered_by: String,
    pub patient_barcode_scanned: bool,
    pub medication_barcode_scanned: bool,
    pub administered_at: DateTime<Utc>,
    pub record_hash: String,
    pub previous_hash: String,
}

impl From<&AdministrationRecord> for AdministrationResponse {
    fn from(record: &AdministrationRecord) -> Self {
        let p = &record.payload;
        Self {
            record_id: p.record_id,
            chain_sequence: record.sequence_number,
            order_id: p.order_id.clone(),
            patient_id: p.patient_id.clone(),
            administered_by: p.administered_by.clone(),
            patient_barcode_scanned: p.patient_barcode_scanned,
            medication_barcode_scanned: p.medication_barcode_scanned,
            administered_at: p.administered_at,
            record_hash: record.record_hash.clone(),
            previous_hash: record.previous_hash.clone(),
        }
    }
}

/// Query parameters of `GET /api/dashboard/chain/verify`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyQuery {
    #[serde(default)]
    pub from: Option<u64>,
    #[serde(default)]
    pub to: Option<u64>,
}

impl VerifyQuery {
    /// Fill in missing bounds: `from` defaults to the genesis sequence, `to`
    /// to `tail`.  No bounds at all means "whole chain" (`None`).
    ///
    /// On an empty chain a partial query resolves to a range the ledger
    /// rejects as `InvalidRange`.
    pub fn resolve(self, tail: Option<u64>) -> Option<VerifyRange> {
        match (self.from, self.to) {
            (None, None) => None,
            (from, to) => Some(VerifyRange::new(
                from.unwrap_or(GENESIS_SEQUENCE),
                to.or(tail).unwrap_or(0),
            )),
        }
    }
}

/// What `GET /api/dashboard/chain/verify` returns.
///
/// `{valid, recordsChecked}` on success, or
/// `{valid: false, firstBrokenSequenceNumber, reason, message}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub valid: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records_checked: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_broken_sequence_number: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Operator-facing finding, e.g. "record #482 failed verification: hash mismatch".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<&VerificationResult> for VerifyResponse {
    fn from(result: &VerificationResult) -> Self {
        Self::for_range(result, None)
    }
}

impl VerifyResponse {
    /// Build the body for a scan of `range` (`None` for the whole chain).
    ///
    /// A range scan is anchored on the record just before `range.from`, so
    /// a break can be reported there; the message says when it falls
    /// outside the requested bounds.
    pub fn for_range(result: &VerificationResult, range: Option<VerifyRange>) -> Self {
        match result {
            VerificationResult::Valid { records_checked } => Self {
                valid: true,
                records_checked: Some(*records_checked),
                first_broken_sequence_number: None,
                reason: None,
                message: None,
            },
            VerificationResult::Invalid {
                first_broken_sequence_number,
                reason,
                ..
            } => Self {
                valid: false,
                records_checked: None,
                first_broken_sequence_number: Some(*first_broken_sequence_number),
                reason: Some(reason.to_string()),
                message: Some(match range {
                    Some(r) if *first_broken_sequence_number < r.from => format!(
                        "record #{} failed verification: {} (it precedes the requested range {}..={} and anchors its first link)",
                        first_broken_sequence_number, reason, r.from, r.to
                    ),
                    _ => format!(
                        "record #{} failed verification: {}",
                        first_broken_sequence_number, reason
                    ),
                }),
            },
        }
    }
}
