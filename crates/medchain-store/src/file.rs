//! JSON Lines implementation of `RecordStore`.
//!
//! One record per line, oldest first.  The file is only ever opened for
//! append; `sync_data` runs after every record so an acknowledged append
//! survives a crash.  Writers and readers in this process serialize on a
//! mutex, which keeps readers from seeing a half-written line.  Separate
//! processes must not write the same file.
//!
//! A record is committed once its terminating newline is on disk.  An
//! unterminated last line is the remnant of a write that never completed:
//! readers skip it and the next append truncates it away.  A failed write
//! or sync rolls the file back to its committed length.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info, warn};

use medchain_contracts::{
    error::{ChainError, ChainResult},
    record::{AdministrationRecord, GENESIS_SEQUENCE},
};
use medchain_core::traits::{AppendOutcome, RecordStore};

/// A durable, append-only store backed by a `.jsonl` file.
pub struct JsonlRecordStore {
    path: PathBuf,
    io_lock: Mutex<()>,
}

/// Decoded file contents.
struct Loaded {
    /// Committed records, sorted by sequence number.
    records: Vec<AdministrationRecord>,
    /// Byte length of the committed prefix (through the last newline).
    committed_len: u64,
    /// Byte length of the whole file, torn remnant included.
    file_len: u64,
}

impl JsonlRecordStore {
    /// Open `path`, creating an empty file if it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> ChainResult<Self> {
        let path = path.into();
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_error(&path, "open", e))?;

        info!(path = %path.display(), "opened record file");
        Ok(Self {
            path,
            io_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> ChainResult<MutexGuard<'_, ()>> {
        self.io_lock.lock().map_err(|e| ChainError::StorageUnavailable {
            reason: format!("record file lock poisoned: {}", e),
        })
    }

    /// Decode every committed line.  Caller holds the lock.
    fn load(&self) -> ChainResult<Loaded> {
        let bytes = std::fs::read(&self.path).map_err(|e| io_error(&self.path, "read", e))?;
        let committed = bytes
            .iter()
            .rposition(|b| *b == b'\n')
            .map_or(0, |i| i + 1);

        if committed < bytes.len() {
            warn!(
                path = %self.path.display(),
                torn_bytes = bytes.len() - committed,
                "ignoring unterminated last line left by an incomplete write"
            );
        }

        let text = std::str::from_utf8(&bytes[..committed]).map_err(|e| {
            ChainError::StorageUnavailable {
                reason: format!("'{}' is not valid UTF-8: {}", self.path.display(), e),
            }
        })?;

        let mut records = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: AdministrationRecord =
                serde_json::from_str(line).map_err(|e| ChainError::StorageUnavailable {
                    reason: format!(
                        "cannot decode line {} of '{}': {}",
                        idx + 1,
                        self.path.display(),
                        e
                    ),
                })?;
            records.push(record);
        }

        records.sort_by_key(|r| r.sequence_number);
        Ok(Loaded {
            records,
            committed_len: committed as u64,
            file_len: bytes.len() as u64,
        })
    }

    fn read_all(&self) -> ChainResult<Vec<AdministrationRecord>> {
        Ok(self.load()?.records)
    }

    /// Append one encoded line after the committed prefix.  On failure the
    /// file is cut back to `committed_len`.
    fn write_line(&self, line: &[u8], loaded: &Loaded) -> ChainResult<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| io_error(&self.path, "open", e))?;

        if loaded.file_len > loaded.committed_len {
            file.set_len(loaded.committed_len)
                .map_err(|e| io_error(&self.path, "truncate", e))?;
            info!(
                path = %self.path.display(),
                committed_len = loaded.committed_len,
                "discarded unterminated last line"
            );
        }

        let written = file
            .write_all(line)
            .map_err(|e| io_error(&self.path, "write", e))
            .and_then(|()| file.sync_data().map_err(|e| io_error(&self.path, "sync", e)));

        if let Err(e) = written {
            if let Err(rollback) = file.set_len(loaded.committed_len) {
                warn!(
                    path = %self.path.display(),
                    error = %rollback,
                    "could not roll back a failed append"
                );
            }
            return Err(e);
        }
        Ok(())
    }
}

fn io_error(path: &Path, op: &str, e: std::io::Error) -> ChainError {
    ChainError::StorageUnavailable {
        reason: format!("failed to {} '{}': {}", op, path.display(), e),
    }
}

// ── RecordStore impl ──────────────────────────────────────────────────────────

impl RecordStore for JsonlRecordStore {
    fn tail(&self) -> ChainResult<Option<AdministrationRecord>> {
        let _guard = self.lock()?;
        Ok(self.read_all()?.pop())
    }

    fn range(&self, from: u64, to: u64) -> ChainResult<Vec<AdministrationRecord>> {
        let _guard = self.lock()?;
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|r| r.sequence_number >= from && r.sequence_number <= to)
            .collect())
    }

    fn append_atomic(&self, record: &AdministrationRecord) -> ChainResult<AppendOutcome> {
        let _guard = self.lock()?;

        let loaded = self.load()?;
        let next = loaded
            .records
            .last()
            .map(|r| r.sequence_number + 1)
            .unwrap_or(GENESIS_SEQUENCE);
        if record.sequence_number != next {
            debug!(
                sequence = record.sequence_number,
                expected = next,
                "rejecting append that does not extend the tail"
            );
            return Ok(AppendOutcome::Conflict);
        }

        let mut line = serde_json::to_vec(record).map_err(|e| ChainError::StorageUnavailable {
            reason: format!("cannot encode record {}: {}", record.sequence_number, e),
        })?;
        line.push(b'\n');

        self.write_line(&line, &loaded)?;
        Ok(AppendOutcome::Appended)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    use medchain_contracts::{
        error::ChainError,
        record::RecordPayload,
        verify::{BreakReason, VerificationResult},
    };
    use medchain_core::{HashChainLedger, LedgerConfig, RecordStore};

    use super::JsonlRecordStore;

    fn scratch_path() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("medchain-test-{}.jsonl", Uuid::new_v4()))
    }

    fn payload(hour: u32) -> RecordPayload {
        RecordPayload {
            record_id: Uuid::new_v4(),
            patient_id: "P1".to_string(),
            order_id: "ORD-55".to_string(),
            administered_by: "nurse-9".to_string(),
            patient_barcode_scanned: true,
            medication_barcode_scanned: true,
            administered_at: Utc.with_ymd_and_hms(2024, 2, 10, hour, 0, 0).unwrap(),
        }
    }

    #[test]
    fn records_survive_reopen() {
        let path = scratch_path();
        {
            let store = Arc::new(JsonlRecordStore::open(&path).unwrap());
            let ledger = HashChainLedger::new(store, LedgerConfig::default());
            for h in 0..3 {
                ledger.append(payload(h)).unwrap();
            }
        }

        let store = Arc::new(JsonlRecordStore::open(&path).unwrap());
        assert_eq!(store.tail().unwrap().unwrap().sequence_number, 3);
        let ledger = HashChainLedger::new(store, LedgerConfig::default());
        assert_eq!(
            ledger.verify(None).unwrap(),
            VerificationResult::Valid { records_checked: 3 }
        );

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn edited_line_is_detected() {
        let path = scratch_path();
        let store = Arc::new(JsonlRecordStore::open(&path).unwrap());
        let ledger = HashChainLedger::new(store, LedgerConfig::default());
        for h in 0..3 {
            ledger.append(payload(h)).unwrap();
        }

        // Rewrite record 2's timestamp directly in the file.
        let contents = std::fs::read_to_string(&path).unwrap();
        let rewritten: Vec<String> = contents
            .lines()
            .map(|line| {
                let mut value: serde_json::Value = serde_json::from_str(line).unwrap();
                if value["sequence_number"] == 2 {
                    value["administered_at"] = serde_json::json!("2024-02-10T23:59:00Z");
                }
                value.to_string()
            })
            .collect();
        std::fs::write(&path, rewritten.join("\n") + "\n").unwrap();

        assert_eq!(
            ledger.verify(None).unwrap(),
            VerificationResult::Invalid {
                first_broken_sequence_number: 2,
                reason: BreakReason::HashMismatch,
                records_checked: 1,
            }
        );

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn verify_leaves_file_bytes_untouched() {
        let path = scratch_path();
        let store = Arc::new(JsonlRecordStore::open(&path).unwrap());
        let ledger = HashChainLedger::new(store, LedgerConfig::default());
        for h in 0..4 {
            ledger.append(payload(h)).unwrap();
        }

        let before = std::fs::read(&path).unwrap();
        let first = ledger.verify(None).unwrap();
        let second = ledger.verify(None).unwrap();
        assert_eq!(first, second);
        assert_eq!(before, std::fs::read(&path).unwrap());

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn edited_sequence_number_is_blamed_on_its_line() {
        let path = scratch_path();
        let store = Arc::new(JsonlRecordStore::open(&path).unwrap());
        let ledger = HashChainLedger::new(store, LedgerConfig::default());
        for h in 0..5 {
            ledger.append(payload(h)).unwrap();
        }

        // Line 2 now claims to be record 3; the real record 3 is intact.
        let contents = std::fs::read_to_string(&path).unwrap();
        let rewritten: Vec<String> = contents
            .lines()
            .enumerate()
            .map(|(i, line)| {
                let mut value: serde_json::Value = serde_json::from_str(line).unwrap();
                if i == 1 {
                    value["sequence_number"] = serde_json::json!(3);
                }
                value.to_string()
            })
            .collect();
        std::fs::write(&path, rewritten.join("\n") + "\n").unwrap();

        assert_eq!(
            ledger.verify(None).unwrap(),
            VerificationResult::Invalid {
                first_broken_sequence_number: 2,
                reason: BreakReason::HashMismatch,
                records_checked: 1,
            }
        );

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn torn_last_line_is_skipped_then_replaced() {
        let path = scratch_path();
        let store = Arc::new(JsonlRecordStore::open(&path).unwrap());
        let ledger = HashChainLedger::new(store.clone(), LedgerConfig::default());
        for h in 0..3 {
            ledger.append(payload(h)).unwrap();
        }
        let committed = std::fs::read(&path).unwrap();

        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(br#"{"sequence_number":4,"record_"#)
            .unwrap();

        assert_eq!(store.tail().unwrap().unwrap().sequence_number, 3);
        assert_eq!(
            ledger.verify(None).unwrap(),
            VerificationResult::Valid { records_checked: 3 }
        );

        let fourth = ledger.append(payload(3)).unwrap();
        assert_eq!(fourth.sequence_number, 4);

        let after = std::fs::read(&path).unwrap();
        assert!(after.starts_with(&committed), "committed lines must be preserved");
        assert!(after.ends_with(b"\n"));
        assert_eq!(after.iter().filter(|b| **b == b'\n').count(), 4);
        assert_eq!(
            ledger.verify(None).unwrap(),
            VerificationResult::Valid { records_checked: 4 }
        );

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn garbage_line_is_storage_unavailable() {
        let path = scratch_path();
        std::fs::write(&path, "{not json}\n").unwrap();
        let store = JsonlRecordStore::open(&path).unwrap();

        let err = store.tail().unwrap_err();
        assert!(matches!(err, ChainError::StorageUnavailable { .. }));
        assert!(err.to_string().contains("line 1"));

        std::fs::remove_file(&path).unwrap();
    }
}
