//! The medication-administration hash-chain ledger.
//!
//! The ledger enforces the chain model on top of any `RecordStore`:
//!
//!   read tail → link → hash → conditional append (retry on conflict)
//!
//! There is no in-process tail cursor.  The store's `append_atomic` is the
//! only serialization point, so several ledgers (threads, processes, hosts)
//! may share one store and still produce a gap-free chain.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use medchain_contracts::{
    error::{ChainError, ChainResult},
    record::{AdministrationRecord, RecordPayload, GENESIS_HASH, GENESIS_SEQUENCE},
    verify::{BreakReason, ChainExport, VerificationResult, VerifyRange},
};

use crate::{
    cancel::{CancelToken, Interrupt},
    chain::{check_record, seal_record},
    config::LedgerConfig,
    traits::{AppendOutcome, RecordStore},
};

/// Append-only, tamper-evident log of medication administrations.
///
/// Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct HashChainLedger {
    store: Arc<dyn RecordStore>,
    config: LedgerConfig,
}

impl HashChainLedger {
    pub fn new(store: Arc<dyn RecordStore>, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Seal `payload` onto the end of the chain and persist it.
    ///
    /// # Algorithm
    ///
    /// 1. Read the current tail (or use genesis values on an empty chain)
    /// 2. Link: `previous_hash` = tail hash, `sequence_number` = tail + 1
    /// 3. Hash the canonical bytes together with `previous_hash`
    /// 4. `append_atomic`; on `Conflict` start over from step 1
    ///
    /// # Errors
    ///
    /// - `ChainContention` once `max_append_retries + 1` attempts all lost
    ///   the race for the tail
    /// - `StorageUnavailable` from the store, immediately and without retry
    pub fn append(&self, payload: RecordPayload) -> ChainResult<AdministrationRecord> {
        let attempts = self.config.max_append_retries.saturating_add(1);

        for attempt in 1..=attempts {
            let (sequence_number, previous_hash) = match self.store.tail()? {
                Some(tail) => (tail.sequence_number + 1, tail.record_hash),
                None => (GENESIS_SEQUENCE, GENESIS_HASH.to_string()),
            };

            let record = seal_record(sequence_number, payload.clone(), previous_hash);

            match self.store.append_atomic(&record)? {
                AppendOutcome::Appended => {
                    info!(
                        sequence = record.sequence_number,
                        record_id = %record.payload.record_id,
                        record_hash = %record.record_hash,
                        attempt,
                        "administration record appended"
                    );
                    return Ok(record);
                }
                AppendOutcome::Conflict => {
                    warn!(
                        sequence = sequence_number,
                        attempt,
                        max_attempts = attempts,
                        "append lost the race for the chain tail"
                    );
                }
            }
        }

        Err(ChainError::ChainContention { attempts })
    }

    /// The highest-sequence record, if any.
    pub fn tail(&self) -> ChainResult<Option<AdministrationRecord>> {
        self.store.tail()
    }

    pub fn tail_sequence(&self) -> ChainResult<Option<u64>> {
        Ok(self.store.tail()?.map(|r| r.sequence_number))
    }

    /// Verify the whole chain, or `range` if given.
    ///
    /// Uses a deadline built from `LedgerConfig::verify_timeout_ms`.
    pub fn verify(&self, range: Option<VerifyRange>) -> ChainResult<VerificationResult> {
        let token = match self.config.verify_timeout() {
            Some(timeout) => CancelToken::with_timeout(timeout),
            None => CancelToken::new(),
        };
        self.verify_with(range, &token)
    }

    /// Verify with a caller-controlled cancellation token.
    ///
    /// Read-only.  The tail is read once up front; records appended while
    /// the scan runs are outside the snapshot and are not examined.
    ///
    /// # Errors
    ///
    /// `InvalidRange`, `StorageUnavailable`, `VerificationCancelled`, or
    /// `VerificationTimedOut`.  Corruption is returned as
    /// `Ok(VerificationResult::Invalid { .. })`.
    pub fn verify_with(
        &self,
        range: Option<VerifyRange>,
        token: &CancelToken,
    ) -> ChainResult<VerificationResult> {
        let tail = self.tail_sequence()?;
        let Some((from, to)) = resolve_range(range, tail)? else {
            debug!("verify on empty chain");
            return Ok(VerificationResult::Valid { records_checked: 0 });
        };

        let mut expected_prev = if from == GENESIS_SEQUENCE {
            GENESIS_HASH.to_string()
        } else {
            match self.store.range(from - 1, from - 1)?.pop() {
                Some(prev) => prev.record_hash,
                None => {
                    return Ok(self.report_break(from - 1, BreakReason::MissingRecord, 0));
                }
            }
        };
        let mut expected_seq = from;
        let mut checked = 0u64;
        let mut cursor = from;

        while cursor <= to {
            let page_end = to.min(cursor.saturating_add(self.batch_span()));
            let page = self.store.range(cursor, page_end)?;
            debug!(from = cursor, to = page_end, fetched = page.len(), "verifying page");

            for record in &page {
                if let Some(interrupt) = token.check() {
                    return Err(interrupted(interrupt, checked, token));
                }
                if let Some((at, reason)) = check_record(record, &expected_prev, expected_seq) {
                    return Ok(self.report_break(at, reason, checked));
                }
                expected_prev.clone_from(&record.record_hash);
                expected_seq = record.sequence_number + 1;
                checked += 1;
            }

            if page_end == u64::MAX {
                break;
            }
            cursor = page_end + 1;
        }

        if expected_seq <= to {
            return Ok(self.report_break(expected_seq, BreakReason::MissingRecord, checked));
        }

        info!(from, to, records_checked = checked, "chain verified");
        Ok(VerificationResult::Valid {
            records_checked: checked,
        })
    }

    /// Copy the whole chain, or `range`, into a sealed `ChainExport`.
    ///
    /// The export is not verified here; run `chain::verify_export` on it
    /// (or `verify()` on the live chain) to check it.
    pub fn export(&self, range: Option<VerifyRange>) -> ChainResult<ChainExport> {
        let tail = self.tail_sequence()?;
        let Some((from, to)) = resolve_range(range, tail)? else {
            return Ok(ChainExport {
                from_sequence: GENESIS_SEQUENCE,
                seed_hash: GENESIS_HASH.to_string(),
                records: Vec::new(),
                exported_at: Utc::now(),
                terminal_hash: String::new(),
            });
        };

        let seed_hash = if from == GENESIS_SEQUENCE {
            GENESIS_HASH.to_string()
        } else {
            self.store
                .range(from - 1, from - 1)?
                .pop()
                .map(|r| r.record_hash)
                .ok_or_else(|| ChainError::InvalidRange {
                    from,
                    to,
                    reason: format!("record {} preceding the range is missing", from - 1),
                })?
        };

        let mut records = Vec::new();
        let mut cursor = from;
        while cursor <= to {
            let page_end = to.min(cursor.saturating_add(self.batch_span()));
            records.extend(self.store.range(cursor, page_end)?);
            if page_end == u64::MAX {
                break;
            }
            cursor = page_end + 1;
        }

        let terminal_hash = records
            .last()
            .map(|r| r.record_hash.clone())
            .unwrap_or_default();

        info!(from, to, exported = records.len(), terminal_hash = %terminal_hash, "chain exported");

        Ok(ChainExport {
            from_sequence: from,
            seed_hash,
            records,
            exported_at: Utc::now(),
            terminal_hash,
        })
    }

    /// Records per page minus one; a zero batch size still makes progress.
    fn batch_span(&self) -> u64 {
        self.config.verify_batch_size.max(1) - 1
    }

    fn report_break(&self, at: u64, reason: BreakReason, checked: u64) -> VerificationResult {
        error!(
            first_broken_sequence_number = at,
            reason = %reason,
            records_checked = checked,
            "CHAIN INTEGRITY FAILURE: record #{} failed verification: {}",
            at,
            reason
        );
        VerificationResult::Invalid {
            first_broken_sequence_number: at,
            reason,
            records_checked: checked,
        }
    }
}

/// Turn an optional caller range into concrete inclusive bounds.
///
/// `Ok(None)` means "empty chain, nothing to do".
fn resolve_range(range: Option<VerifyRange>, tail: Option<u64>) -> ChainResult<Option<(u64, u64)>> {
    match (range, tail) {
        (None, None) => Ok(None),
        (None, Some(tail)) => Ok(Some((GENESIS_SEQUENCE, tail))),
        (Some(r), None) => Err(ChainError::InvalidRange {
            from: r.from,
            to: r.to,
            reason: "chain is empty".to_string(),
        }),
        (Some(r), Some(tail)) => {
            let reason = if r.from > r.to {
                Some("from is greater than to".to_string())
            } else if r.from < GENESIS_SEQUENCE {
                Some(format!("chain starts at sequence {}", GENESIS_SEQUENCE))
            } else if r.to > tail {
                Some(format!("chain tail is at sequence {}", tail))
            } else {
                None
            };
            match reason {
                Some(reason) => Err(ChainError::InvalidRange {
                    from: r.from,
                    to: r.to,
                    reason,
                }),
                None => Ok(Some((r.from, r.to))),
            }
        }
    }
}

fn interrupted(interrupt: Interrupt, records_checked: u64, token: &CancelToken) -> ChainError {
    match interrupt {
        Interrupt::Cancelled => {
            warn!(records_checked, "verification cancelled");
            ChainError::VerificationCancelled { records_checked }
        }
        Interrupt::TimedOut => {
            let timeout_ms = token.timeout_ms().unwrap_or_default();
            warn!(records_checked, timeout_ms, "verification timed out");
            ChainError::VerificationTimedOut {
                records_checked,
                timeout_ms,
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    use medchain_contracts::{
        error::{ChainError, ChainResult},
        record::{AdministrationRecord, RecordPayload, GENESIS_HASH},
        verify::{BreakReason, VerificationResult, VerifyRange},
    };

    use crate::{
        cancel::CancelToken,
        chain::{seal_record, verify_records},
        config::LedgerConfig,
        traits::{AppendOutcome, RecordStore},
    };

    use super::HashChainLedger;

    // ── Mock helpers ─────────────────────────────────────────────────────────

    /// A vector-backed store with fault injection.
    #[derive(Default)]
    struct MockStore {
        records: Mutex<Vec<AdministrationRecord>>,
        /// Number of upcoming `append_atomic` calls to answer with Conflict.
        conflicts: Mutex<u32>,
        append_calls: Mutex<u32>,
        fail_appends: bool,
        /// Record slipped in during the first `range` call (snapshot test).
        late_arrival: Mutex<Option<AdministrationRecord>>,
        /// Overrides `tail()` without being visible to `range()`.
        phantom_tail: Mutex<Option<AdministrationRecord>>,
    }

    impl RecordStore for MockStore {
        fn tail(&self) -> ChainResult<Option<AdministrationRecord>> {
            if let Some(phantom) = self.phantom_tail.lock().unwrap().clone() {
                return Ok(Some(phantom));
            }
            Ok(self.records.lock().unwrap().last().cloned())
        }

        fn range(&self, from: u64, to: u64) -> ChainResult<Vec<AdministrationRecord>> {
            let mut records = self.records.lock().unwrap();
            if let Some(late) = self.late_arrival.lock().unwrap().take() {
                records.push(late);
            }
            Ok(records
                .iter()
                .filter(|r| r.sequence_number >= from && r.sequence_number <= to)
                .cloned()
                .collect())
        }

        fn append_atomic(&self, record: &AdministrationRecord) -> ChainResult<AppendOutcome> {
            *self.append_calls.lock().unwrap() += 1;
            if self.fail_appends {
                return Err(ChainError::StorageUnavailable {
                    reason: "database offline".to_string(),
                });
            }
            let mut conflicts = self.conflicts.lock().unwrap();
            if *conflicts > 0 {
                *conflicts -= 1;
                return Ok(AppendOutcome::Conflict);
            }
            let mut records = self.records.lock().unwrap();
            let next = records.last().map(|r| r.sequence_number + 1).unwrap_or(1);
            if record.sequence_number != next {
                return Ok(AppendOutcome::Conflict);
            }
            records.push(record.clone());
            Ok(AppendOutcome::Appended)
        }
    }

    fn payload(minute: u32) -> RecordPayload {
        RecordPayload {
            record_id: Uuid::new_v4(),
            patient_id: "P1".to_string(),
            order_id: format!("ORD-{}", minute),
            administered_by: "nurse-3".to_string(),
            patient_barcode_scanned: true,
            medication_barcode_scanned: true,
            administered_at: Utc.with_ymd_and_hms(2024, 6, 1, 10, minute, 0).unwrap(),
        }
    }

    fn ledger_with(store: Arc<MockStore>, config: LedgerConfig) -> HashChainLedger {
        HashChainLedger::new(store, config)
    }

    fn filled(n: u32, config: LedgerConfig) -> (Arc<MockStore>, HashChainLedger) {
        let store = Arc::new(MockStore::default());
        let ledger = ledger_with(store.clone(), config);
        for i in 0..n {
            ledger.append(payload(i)).unwrap();
        }
        (store, ledger)
    }

    // ── append ───────────────────────────────────────────────────────────────

    #[test]
    fn first_append_links_to_genesis() {
        let (_, ledger) = filled(0, LedgerConfig::default());
        let record = ledger.append(payload(0)).unwrap();
        assert_eq!(record.sequence_number, 1);
        assert_eq!(record.previous_hash, GENESIS_HASH);
        assert_eq!(record.record_hash.len(), 64);
    }

    #[test]
    fn appends_link_to_previous_record() {
        let (store, _) = filled(3, LedgerConfig::default());
        let records = store.records.lock().unwrap();
        let seqs: Vec<u64> = records.iter().map(|r| r.sequence_number).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(records[1].previous_hash, records[0].record_hash);
        assert_eq!(records[2].previous_hash, records[1].record_hash);
    }

    #[test]
    fn conflict_is_retried_until_success() {
        let store = Arc::new(MockStore::default());
        *store.conflicts.lock().unwrap() = 2;
        let ledger = ledger_with(store.clone(), LedgerConfig::default());

        let record = ledger.append(payload(0)).unwrap();
        assert_eq!(record.sequence_number, 1);
        assert_eq!(*store.append_calls.lock().unwrap(), 3);
    }

    #[test]
    fn exhausted_retries_surface_contention() {
        let store = Arc::new(MockStore::default());
        *store.conflicts.lock().unwrap() = 100;
        let config = LedgerConfig {
            max_append_retries: 2,
            ..LedgerConfig::default()
        };
        let ledger = ledger_with(store.clone(), config);

        let err = ledger.append(payload(0)).unwrap_err();
        assert!(
            matches!(err, ChainError::ChainContention { attempts: 3 }),
            "expected ChainContention after 3 attempts, got {:?}",
            err
        );
        assert_eq!(*store.append_calls.lock().unwrap(), 3);
        assert!(store.records.lock().unwrap().is_empty());
    }

    #[test]
    fn storage_failure_is_not_retried() {
        let store = Arc::new(MockStore {
            fail_appends: true,
            ..MockStore::default()
        });
        let ledger = ledger_with(store.clone(), LedgerConfig::default());

        let err = ledger.append(payload(0)).unwrap_err();
        assert!(matches!(err, ChainError::StorageUnavailable { .. }));
        assert_eq!(*store.append_calls.lock().unwrap(), 1, "storage errors must fail fast");
    }

    // ── verify ───────────────────────────────────────────────────────────────

    #[test]
    fn empty_chain_is_valid() {
        let (_, ledger) = filled(0, LedgerConfig::default());
        assert_eq!(
            ledger.verify(None).unwrap(),
            VerificationResult::Valid { records_checked: 0 }
        );
    }

    #[test]
    fn range_on_empty_chain_is_invalid_range() {
        let (_, ledger) = filled(0, LedgerConfig::default());
        let err = ledger.verify(Some(VerifyRange::new(1, 1))).unwrap_err();
        assert!(matches!(err, ChainError::InvalidRange { .. }));
    }

    #[test]
    fn bad_ranges_are_rejected() {
        let (_, ledger) = filled(3, LedgerConfig::default());
        for (from, to) in [(3, 2), (0, 2), (1, 4)] {
            let err = ledger.verify(Some(VerifyRange::new(from, to))).unwrap_err();
            assert!(
                matches!(err, ChainError::InvalidRange { .. }),
                "range {}..={} should be rejected, got {:?}",
                from,
                to,
                err
            );
        }
    }

    #[test]
    fn paged_full_verify_counts_every_record() {
        let config = LedgerConfig {
            verify_batch_size: 2,
            ..LedgerConfig::default()
        };
        let (_, ledger) = filled(5, config);
        assert_eq!(
            ledger.verify(None).unwrap(),
            VerificationResult::Valid { records_checked: 5 }
        );
    }

    #[test]
    fn mid_chain_range_seeds_from_predecessor() {
        let (_, ledger) = filled(6, LedgerConfig::default());
        assert_eq!(
            ledger.verify(Some(VerifyRange::new(3, 5))).unwrap(),
            VerificationResult::Valid { records_checked: 3 }
        );
    }

    #[test]
    fn range_reports_first_break_inside_it() {
        let (store, ledger) = filled(6, LedgerConfig::default());
        store.records.lock().unwrap()[3].payload.patient_barcode_scanned = false;
        assert_eq!(
            ledger.verify(Some(VerifyRange::new(2, 6))).unwrap(),
            VerificationResult::Invalid {
                first_broken_sequence_number: 4,
                reason: BreakReason::HashMismatch,
                records_checked: 2,
            }
        );
    }

    #[test]
    fn trailing_gap_before_tail_is_missing_record() {
        // tail() reports sequence 5 but range() only holds 1..=3.
        let (store, ledger) = filled(3, LedgerConfig::default());
        let phantom = {
            let records = store.records.lock().unwrap();
            AdministrationRecord {
                sequence_number: 5,
                ..records[2].clone()
            }
        };
        *store.phantom_tail.lock().unwrap() = Some(phantom);

        assert_eq!(
            ledger.verify(None).unwrap(),
            VerificationResult::Invalid {
                first_broken_sequence_number: 4,
                reason: BreakReason::MissingRecord,
                records_checked: 3,
            }
        );
    }

    #[test]
    fn verify_ignores_records_appended_during_scan() {
        let (store, ledger) = filled(3, LedgerConfig::default());
        let late = {
            let records = store.records.lock().unwrap();
            seal_record(4, payload(9), records[2].record_hash.clone())
        };
        *store.late_arrival.lock().unwrap() = Some(late);

        assert_eq!(
            ledger.verify(None).unwrap(),
            VerificationResult::Valid { records_checked: 3 },
            "snapshot must be bounded by the tail read at the start"
        );
        assert_eq!(ledger.tail_sequence().unwrap(), Some(4));
    }

    #[test]
    fn cancelled_token_stops_scan() {
        let (_, ledger) = filled(3, LedgerConfig::default());
        let token = CancelToken::new();
        token.cancel();
        let err = ledger.verify_with(None, &token).unwrap_err();
        assert!(matches!(err, ChainError::VerificationCancelled { records_checked: 0 }));
    }

    #[test]
    fn expired_deadline_times_out() {
        let (_, ledger) = filled(2, LedgerConfig::default());
        let token = CancelToken::with_timeout(Duration::ZERO);
        let err = ledger.verify_with(None, &token).unwrap_err();
        assert!(matches!(
            err,
            ChainError::VerificationTimedOut { records_checked: 0, timeout_ms: 0 }
        ));
    }

    // ── export ───────────────────────────────────────────────────────────────

    #[test]
    fn export_of_empty_chain_has_no_terminal_hash() {
        let (_, ledger) = filled(0, LedgerConfig::default());
        let export = ledger.export(None).unwrap();
        assert!(export.records.is_empty());
        assert!(export.terminal_hash.is_empty());
    }

    #[test]
    fn export_verifies_offline() {
        let (_, ledger) = filled(5, LedgerConfig::default());

        let full = ledger.export(None).unwrap();
        assert_eq!(full.records.len(), 5);
        assert_eq!(full.terminal_hash, full.records[4].record_hash);
        assert!(verify_records(&full.records, &full.seed_hash, full.from_sequence).is_valid());

        let slice = ledger.export(Some(VerifyRange::new(2, 4))).unwrap();
        assert_eq!(slice.seed_hash, full.records[0].record_hash);
        assert_eq!(
            verify_records(&slice.records, &slice.seed_hash, slice.from_sequence),
            VerificationResult::Valid { records_checked: 3 }
        );
    }
}
