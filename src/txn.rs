//!
//! Transaction lifecycle. A transaction is an integer id, a state, the
//! set of locks it holds ( tracked by the lock manager ) and its starting
//! LSN. Write operators record their log entries against the transaction
//! so abort can re-apply before-images in reverse without re-reading the
//! log file.

use crate::err::{Error, Result};
use crate::lock::LockManager;
use crate::storage::StorageEngine;
use crate::wal::{LogEntry, LogManager, LogOp};
use log::debug;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// ACTIVE -> COMMITTED | ABORTED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Active,
    Committed,
    Aborted,
}

/// One in-flight transaction.
#[derive(Debug)]
pub struct Transaction {
    pub id: u64,
    pub state: TxnState,
    pub start_lsn: u64,
    /// Data entries appended so far, in order, for compensation.
    writes: Vec<LogEntry>,
}

/// Owner of all transactions. Ids increase monotonically, which is also
/// the age order wait-die relies on.
pub struct TransactionManager {
    next_id: AtomicU64,
    txns: Mutex<FxHashMap<u64, Transaction>>,
}

impl Default for TransactionManager {
    fn default() -> Self {
        TransactionManager {
            next_id: AtomicU64::new(1),
            txns: Mutex::new(FxHashMap::default()),
        }
    }
}

impl TransactionManager {
    pub fn new() -> TransactionManager {
        TransactionManager::default()
    }

    /// Ids start above everything already in the log, so transaction
    /// numbering ( and with it wait-die age ) never repeats across
    /// restarts.
    pub fn starting_after(max_seen: u64) -> TransactionManager {
        TransactionManager {
            next_id: AtomicU64::new(max_seen + 1),
            txns: Mutex::new(FxHashMap::default()),
        }
    }

    /// Allocate an id, write BEGIN ( buffered, not forced ), go ACTIVE.
    pub fn begin(&self, log: &LogManager) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let start_lsn = log.append(LogEntry::begin(id));
        self.txns.lock().insert(
            id,
            Transaction {
                id,
                state: TxnState::Active,
                start_lsn,
                writes: Vec::new(),
            },
        );
        debug!("txn {} began at lsn {}", id, start_lsn);
        id
    }

    /// Is the transaction currently ACTIVE?
    pub fn is_active(&self, txn: u64) -> bool {
        self.txns
            .lock()
            .get(&txn)
            .map(|t| t.state == TxnState::Active)
            .unwrap_or(false)
    }

    /// Error unless ACTIVE; operators call this to propagate an abort
    /// observed mid-pipeline.
    pub fn ensure_active(&self, txn: u64) -> Result<()> {
        if self.is_active(txn) {
            Ok(())
        } else {
            Err(Error::Aborted(txn))
        }
    }

    /// Remember a data entry for later compensation.
    pub fn record_write(&self, txn: u64, entry: LogEntry) -> Result<()> {
        let mut txns = self.txns.lock();
        let t = txns.get_mut(&txn).ok_or(Error::Aborted(txn))?;
        t.writes.push(entry);
        Ok(())
    }

    /// COMMIT: force the log, then release every lock. Returns false for
    /// an unknown or already finished transaction.
    pub fn commit(&self, txn: u64, log: &LogManager, locks: &LockManager) -> Result<bool> {
        {
            let mut txns = self.txns.lock();
            match txns.get_mut(&txn) {
                Some(t) if t.state == TxnState::Active => t.state = TxnState::Committed,
                _ => return Ok(false),
            }
        }
        log.append_commit(txn)?;
        locks.release_all(txn);
        self.txns.lock().remove(&txn);
        debug!("txn {} committed", txn);
        Ok(true)
    }

    /// ABORT: re-apply before-images in reverse ( compensating writes ),
    /// append ABORT, force, release locks.
    pub fn abort(
        &self,
        txn: u64,
        log: &LogManager,
        locks: &LockManager,
        storage: &StorageEngine,
    ) -> Result<bool> {
        let writes = {
            let mut txns = self.txns.lock();
            match txns.get_mut(&txn) {
                Some(t) if t.state == TxnState::Active => {
                    t.state = TxnState::Aborted;
                    std::mem::take(&mut t.writes)
                }
                _ => return Ok(false),
            }
        };
        let mut failure = None;
        for e in writes.iter().rev() {
            let outcome = match e.op {
                LogOp::Insert => storage.delete_row_if_present(&e.table, &e.rid),
                LogOp::Update | LogOp::Delete => match &e.before {
                    Some(img) => storage.upsert_row(&e.table, img),
                    None => Err(Error::Invariant(format!(
                        "{} entry without before-image",
                        e.op.as_str()
                    ))),
                },
                _ => Ok(()),
            };
            if let Err(err) = outcome {
                failure = Some(err);
                break;
            }
        }
        log.append(LogEntry::abort(txn));
        log.flush()?;
        locks.release_all(txn);
        self.txns.lock().remove(&txn);
        debug!("txn {} aborted ({} writes compensated)", txn, writes.len());
        match failure {
            Some(err) => Err(err),
            None => Ok(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Column, Schema};
    use crate::value::{DataType, Value};
    use crate::wal::LogOp;
    use tempfile::TempDir;

    fn setup() -> (TempDir, StorageEngine, LogManager, LockManager, TransactionManager) {
        let dir = TempDir::new().unwrap();
        let storage = StorageEngine::new(dir.path()).unwrap();
        let log = LogManager::open(&dir.path().join("wal.log"), 10).unwrap();
        (dir, storage, log, LockManager::new(), TransactionManager::new())
    }

    #[test]
    fn lifecycle_states() {
        let (_d, _s, log, locks, tm) = setup();
        let t = tm.begin(&log);
        assert!(tm.is_active(t));
        assert!(tm.commit(t, &log, &locks).unwrap());
        assert!(!tm.is_active(t));
        // Finished transactions cannot commit or abort again.
        assert!(!tm.commit(t, &log, &locks).unwrap());
        assert!(tm.ensure_active(t).is_err());
    }

    #[test]
    fn commit_without_locks_leaves_lock_table_alone() {
        let (_d, _s, log, locks, tm) = setup();
        let t = tm.begin(&log);
        assert!(tm.commit(t, &log, &locks).unwrap());
        assert_eq!(locks.object_count(), 0);
    }

    #[test]
    fn abort_compensates_writes_in_reverse() {
        let (_d, storage, log, locks, tm) = setup();
        storage
            .create_table(&Schema::new(
                "accounts",
                vec![
                    Column::new("id", DataType::Int),
                    Column::new("bal", DataType::Int),
                ],
            ))
            .unwrap();
        let row = storage
            .insert(
                "accounts",
                &[
                    ("id".to_string(), Value::Int(1)),
                    ("bal".to_string(), Value::Int(1000)),
                ],
            )
            .unwrap();

        let t = tm.begin(&log);
        let (before, after) = storage
            .update_row("accounts", &row.rid, &[("bal".to_string(), Value::Int(900))])
            .unwrap();
        let entry = LogEntry::update(t, "accounts", before, after);
        log.append(entry.clone());
        tm.record_write(t, entry).unwrap();

        assert!(tm.abort(t, &log, &locks, &storage).unwrap());
        let got: Vec<_> = storage
            .read("accounts", &[])
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(got[0].get("bal"), Some(&Value::Int(1000)));
        let entries = log.read_entries().unwrap();
        assert_eq!(entries.last().unwrap().op, LogOp::Abort);
    }

    #[test]
    fn ids_are_monotonic() {
        let (_d, _s, log, _locks, tm) = setup();
        let a = tm.begin(&log);
        let b = tm.begin(&log);
        assert!(b > a);
    }
}
