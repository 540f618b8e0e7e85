//!
//! Strict two-phase locking on row identifiers. Shared locks for reads,
//! exclusive for writes; at most one exclusive holder, or any number of
//! shared holders, per object. Nothing is released before commit or
//! abort, so the shrinking phase is a single moment at the end.
//!
//! Deadlock avoidance is wait-die, with the transaction id as the age
//! ( a smaller id is older ): a requester older than every conflicting
//! holder blocks on the lock table's condvar; a younger requester is
//! denied with `Deadlock` and its transaction aborts. Waiters are queued
//! FIFO per object so a stream of shared requests cannot starve a writer.

use crate::err::{Error, Result};
use parking_lot::{Condvar, Mutex};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;

/// What the caller is about to do with the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Write,
}

/// Granted lock strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    fn of(action: Action) -> LockMode {
        match action {
            Action::Read => LockMode::Shared,
            Action::Write => LockMode::Exclusive,
        }
    }

    fn name(self) -> &'static str {
        match self {
            LockMode::Shared => "shared",
            LockMode::Exclusive => "exclusive",
        }
    }
}

#[derive(Default)]
struct LockState {
    mode: Option<LockMode>,
    holders: FxHashSet<u64>,
    waiters: VecDeque<u64>,
}

#[derive(Default)]
struct LockTable {
    locks: FxHashMap<String, LockState>,
    /// Transaction -> objects it holds, released all at once at the end.
    held: FxHashMap<u64, Vec<String>>,
}

/// The lock manager. One mutex guards the whole table; waits block on
/// the condvar and re-check after every release.
#[derive(Default)]
pub struct LockManager {
    table: Mutex<LockTable>,
    cond: Condvar,
}

impl LockManager {
    pub fn new() -> LockManager {
        LockManager::default()
    }

    /// Acquire the lock the action needs, blocking when wait-die says
    /// this transaction may wait. The growing phase: every grant is
    /// recorded against the transaction until release at commit/abort.
    pub fn validate(&self, action: Action, object: &str, txn: u64) -> Result<()> {
        let want = LockMode::of(action);
        let mut t = self.table.lock();
        loop {
            match self.try_grant(&mut t, want, object, txn) {
                Grant::Granted => {
                    self.cond.notify_all();
                    return Ok(());
                }
                Grant::Wait => {
                    self.cond.wait(&mut t);
                }
                Grant::Die => {
                    let st = t.locks.get_mut(object).unwrap();
                    st.waiters.retain(|w| *w != txn);
                    return Err(Error::Deadlock {
                        txn,
                        object: object.to_string(),
                    });
                }
            }
        }
    }

    fn try_grant(&self, t: &mut LockTable, want: LockMode, object: &str, txn: u64) -> Grant {
        let st = t.locks.entry(object.to_string()).or_default();

        if st.holders.contains(&txn) {
            let held = st.mode.unwrap_or(LockMode::Exclusive);
            if held == LockMode::Exclusive || want == LockMode::Shared {
                st.waiters.retain(|w| *w != txn);
                return Grant::Granted; // re-entrant
            }
            if st.holders.len() == 1 {
                st.mode = Some(LockMode::Exclusive); // upgrade as sole holder
                st.waiters.retain(|w| *w != txn);
                return Grant::Granted;
            }
            // Upgrade blocked by other shared holders.
            return self.queue_or_die(st, object, txn);
        }

        let compatible = match st.mode {
            None => true,
            Some(LockMode::Shared) => want == LockMode::Shared,
            Some(LockMode::Exclusive) => false,
        };
        let my_turn = st.waiters.front().map_or(true, |w| *w == txn);
        if compatible && my_turn {
            if st.waiters.front() == Some(&txn) {
                st.waiters.pop_front();
            }
            st.mode = Some(match st.mode {
                Some(LockMode::Shared) => LockMode::Shared,
                _ => want,
            });
            st.holders.insert(txn);
            t.held.entry(txn).or_default().push(object.to_string());
            return Grant::Granted;
        }
        self.queue_or_die(st, object, txn)
    }

    /// Wait-die: wait only when older than every conflicting holder.
    fn queue_or_die(&self, st: &mut LockState, _object: &str, txn: u64) -> Grant {
        if st.holders.iter().any(|h| *h != txn && *h < txn) {
            return Grant::Die;
        }
        if !st.waiters.contains(&txn) {
            st.waiters.push_back(txn);
        }
        Grant::Wait
    }

    /// Release everything the transaction holds; called exactly once,
    /// from commit or abort. A transaction that never locked anything
    /// leaves the table untouched.
    pub fn release_all(&self, txn: u64) {
        let mut t = self.table.lock();
        let objects = t.held.remove(&txn).unwrap_or_default();
        for object in objects {
            if let Some(st) = t.locks.get_mut(&object) {
                st.holders.remove(&txn);
                if st.holders.is_empty() {
                    st.mode = None;
                    if st.waiters.is_empty() {
                        t.locks.remove(&object);
                    }
                }
            }
        }
        // A dying waiter may also be parked in queues.
        for st in t.locks.values_mut() {
            st.waiters.retain(|w| *w != txn);
        }
        self.cond.notify_all();
    }

    /// Objects currently locked by the transaction.
    pub fn locks_held(&self, txn: u64) -> Vec<String> {
        self.table
            .lock()
            .held
            .get(&txn)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of objects with any holder or waiter. Empty for an idle
    /// system; used by tests and the recovery path ( which rebuilds the
    /// table empty by constructing a fresh manager ).
    pub fn object_count(&self) -> usize {
        self.table.lock().locks.len()
    }

    /// Structured denial for a conflict that cannot wait ( reserved for
    /// callers that refuse to block, e.g. try-style probes ).
    pub fn try_validate(&self, action: Action, object: &str, txn: u64) -> Result<()> {
        let want = LockMode::of(action);
        let mut t = self.table.lock();
        match self.try_grant(&mut t, want, object, txn) {
            Grant::Granted => {
                self.cond.notify_all();
                Ok(())
            }
            Grant::Wait | Grant::Die => {
                if let Some(st) = t.locks.get_mut(object) {
                    st.waiters.retain(|w| *w != txn);
                }
                Err(Error::LockConflict {
                    txn,
                    object: object.to_string(),
                    mode: want.name(),
                })
            }
        }
    }
}

enum Grant {
    Granted,
    Wait,
    Die,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn shared_locks_coexist_exclusive_does_not() {
        let lm = LockManager::new();
        lm.validate(Action::Read, "row-1", 1).unwrap();
        lm.validate(Action::Read, "row-1", 2).unwrap();
        // Txn 3 is younger than both holders: dies instead of waiting.
        assert!(matches!(
            lm.validate(Action::Write, "row-1", 3),
            Err(Error::Deadlock { .. })
        ));
        lm.release_all(1);
        lm.release_all(2);
        lm.validate(Action::Write, "row-1", 3).unwrap();
    }

    #[test]
    fn reentrant_and_upgrade() {
        let lm = LockManager::new();
        lm.validate(Action::Read, "row-1", 1).unwrap();
        lm.validate(Action::Read, "row-1", 1).unwrap();
        lm.validate(Action::Write, "row-1", 1).unwrap(); // sole holder upgrade
        lm.validate(Action::Read, "row-1", 1).unwrap(); // exclusive covers reads
        assert_eq!(lm.locks_held(1).len(), 1);
    }

    #[test]
    fn younger_dies_older_waits() {
        let lm = Arc::new(LockManager::new());
        lm.validate(Action::Write, "row-9", 11).unwrap();

        // Younger than the holder: immediate deadlock denial.
        assert!(matches!(
            lm.validate(Action::Write, "row-9", 12),
            Err(Error::Deadlock { txn: 12, .. })
        ));

        // Older than the holder: blocks until release.
        let lm2 = lm.clone();
        let waiter = thread::spawn(move || lm2.validate(Action::Write, "row-9", 10));
        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());
        lm.release_all(11);
        waiter.join().unwrap().unwrap();
        assert_eq!(lm.locks_held(10), vec!["row-9".to_string()]);
    }

    #[test]
    fn wait_die_breaks_the_classic_cycle() {
        // T10 holds row-5, T11 holds row-9; T10 wants row-9, T11 wants
        // row-5. The younger T11 dies, T10 proceeds.
        let lm = Arc::new(LockManager::new());
        lm.validate(Action::Write, "row-5", 10).unwrap();
        lm.validate(Action::Write, "row-9", 11).unwrap();

        let lm2 = lm.clone();
        let older = thread::spawn(move || lm2.validate(Action::Write, "row-9", 10));
        thread::sleep(Duration::from_millis(30));

        let denied = lm.validate(Action::Write, "row-5", 11);
        assert!(matches!(denied, Err(Error::Deadlock { txn: 11, .. })));
        lm.release_all(11);

        older.join().unwrap().unwrap();
        let mut held = lm.locks_held(10);
        held.sort();
        assert_eq!(held, vec!["row-5".to_string(), "row-9".to_string()]);
    }

    #[test]
    fn release_clears_the_table() {
        let lm = LockManager::new();
        lm.validate(Action::Write, "a", 1).unwrap();
        lm.validate(Action::Read, "b", 1).unwrap();
        assert_eq!(lm.object_count(), 2);
        lm.release_all(1);
        assert_eq!(lm.object_count(), 0);
        assert!(lm.locks_held(1).is_empty());
    }

    #[test]
    fn fifo_grant_order() {
        // Holder 5; txn 4 queues first, then the older txn 3. FIFO means
        // 4 is granted first even though 3 is older.
        let lm = Arc::new(LockManager::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        lm.validate(Action::Write, "r", 5).unwrap();
        let (l4, o4) = (lm.clone(), order.clone());
        let t4 = thread::spawn(move || {
            l4.validate(Action::Write, "r", 4).unwrap();
            o4.lock().push(4u64);
            thread::sleep(Duration::from_millis(40));
            l4.release_all(4);
        });
        thread::sleep(Duration::from_millis(20));
        let (l3, o3) = (lm.clone(), order.clone());
        let t3 = thread::spawn(move || {
            l3.validate(Action::Write, "r", 3).unwrap();
            o3.lock().push(3u64);
            l3.release_all(3);
        });
        thread::sleep(Duration::from_millis(20));
        lm.release_all(5);
        t4.join().unwrap();
        t3.join().unwrap();
        assert_eq!(*order.lock(), vec![4, 3]);
    }

    #[test]
    fn try_validate_reports_conflict() {
        let lm = LockManager::new();
        lm.validate(Action::Write, "r", 1).unwrap();
        assert!(matches!(
            lm.try_validate(Action::Write, "r", 2),
            Err(Error::LockConflict { txn: 2, .. })
        ));
    }
}
