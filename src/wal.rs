//!
//! Write-ahead log. UTF-8 text, one entry per line, pipe-separated:
//! `LSN|timestamp|txn|op|table|rid|before|after`. Row images are JSON,
//! with any pipe written as the JSON escape `\u007c` so the field
//! separator never appears inside an image. Entries buffer in memory;
//! the buffer is forced on COMMIT, on CHECKPOINT and on explicit flush.
//! BEGIN does not force. Every tenth commit ( configurable ) appends a
//! CHECKPOINT.

use crate::err::{Error, Result};
use crate::record::Row;
use crate::storage::StorageEngine;
use crate::util;
use log::{info, warn};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Log record kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOp {
    Begin,
    Insert,
    Update,
    Delete,
    Commit,
    Abort,
    Checkpoint,
}

impl LogOp {
    pub fn as_str(self) -> &'static str {
        match self {
            LogOp::Begin => "BEGIN",
            LogOp::Insert => "INSERT",
            LogOp::Update => "UPDATE",
            LogOp::Delete => "DELETE",
            LogOp::Commit => "COMMIT",
            LogOp::Abort => "ABORT",
            LogOp::Checkpoint => "CHECKPOINT",
        }
    }

    fn parse(s: &str) -> Option<LogOp> {
        Some(match s {
            "BEGIN" => LogOp::Begin,
            "INSERT" => LogOp::Insert,
            "UPDATE" => LogOp::Update,
            "DELETE" => LogOp::Delete,
            "COMMIT" => LogOp::Commit,
            "ABORT" => LogOp::Abort,
            "CHECKPOINT" => LogOp::Checkpoint,
            _ => return None,
        })
    }

    /// Does this entry carry row images?
    pub fn is_data(self) -> bool {
        matches!(self, LogOp::Insert | LogOp::Update | LogOp::Delete)
    }
}

/// One log entry. LSNs are assigned at append time and strictly increase.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub lsn: u64,
    pub timestamp: u64,
    pub txn: u64,
    pub op: LogOp,
    pub table: String,
    pub rid: String,
    pub before: Option<Row>,
    pub after: Option<Row>,
}

impl LogEntry {
    fn control(txn: u64, op: LogOp) -> LogEntry {
        LogEntry {
            lsn: 0,
            timestamp: 0,
            txn,
            op,
            table: String::new(),
            rid: String::new(),
            before: None,
            after: None,
        }
    }

    pub fn begin(txn: u64) -> LogEntry {
        Self::control(txn, LogOp::Begin)
    }

    pub fn commit(txn: u64) -> LogEntry {
        Self::control(txn, LogOp::Commit)
    }

    pub fn abort(txn: u64) -> LogEntry {
        Self::control(txn, LogOp::Abort)
    }

    pub fn checkpoint() -> LogEntry {
        Self::control(0, LogOp::Checkpoint)
    }

    /// INSERT carries the after-image only.
    pub fn insert(txn: u64, table: &str, after: Row) -> LogEntry {
        LogEntry {
            rid: after.rid.clone(),
            table: table.to_string(),
            after: Some(after),
            ..Self::control(txn, LogOp::Insert)
        }
    }

    /// UPDATE carries both images.
    pub fn update(txn: u64, table: &str, before: Row, after: Row) -> LogEntry {
        LogEntry {
            rid: after.rid.clone(),
            table: table.to_string(),
            before: Some(before),
            after: Some(after),
            ..Self::control(txn, LogOp::Update)
        }
    }

    /// DELETE carries the before-image only.
    pub fn delete(txn: u64, table: &str, before: Row) -> LogEntry {
        LogEntry {
            rid: before.rid.clone(),
            table: table.to_string(),
            before: Some(before),
            ..Self::control(txn, LogOp::Delete)
        }
    }

    /// Serialize to one log line.
    pub fn encode(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}",
            self.lsn,
            self.timestamp,
            self.txn,
            self.op.as_str(),
            self.table,
            self.rid,
            image_field(&self.before),
            image_field(&self.after),
        )
    }

    /// Parse one log line. None means the line is unreadable ( the
    /// caller decides whether that is a truncated tail or corruption ).
    pub fn decode(line: &str) -> Option<LogEntry> {
        let mut f = line.splitn(8, '|');
        let lsn = f.next()?.parse().ok()?;
        let timestamp = f.next()?.parse().ok()?;
        let txn = f.next()?.parse().ok()?;
        let op = LogOp::parse(f.next()?)?;
        let table = f.next()?.to_string();
        let rid = f.next()?.to_string();
        let before = parse_image(f.next()?)?;
        let after = parse_image(f.next()?)?;
        Some(LogEntry {
            lsn,
            timestamp,
            txn,
            op,
            table,
            rid,
            before,
            after,
        })
    }
}

fn image_field(img: &Option<Row>) -> String {
    match img {
        None => String::new(),
        // serde_json never emits a raw `|` after this escape, so the
        // pipe-delimited line stays splittable.
        Some(row) => serde_json::to_string(row)
            .unwrap_or_default()
            .replace('|', "\\u007c"),
    }
}

/// Outer Option: parse failure. Inner: empty field.
#[allow(clippy::option_option)]
fn parse_image(field: &str) -> Option<Option<Row>> {
    if field.is_empty() {
        return Some(None);
    }
    serde_json::from_str(field).ok().map(Some)
}

struct LogState {
    buf: Vec<LogEntry>,
    next_lsn: u64,
    commits: u64,
    file: File,
}

/// The log manager: sole appender, buffered writes, LSN assignment
/// atomic with the append.
pub struct LogManager {
    path: PathBuf,
    checkpoint_every: u64,
    state: Mutex<LogState>,
}

impl LogManager {
    /// Open ( or create ) the log, seeding the LSN counter past whatever
    /// is already on disk.
    pub fn open(path: &Path, checkpoint_every: u64) -> Result<LogManager> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)?;
        let lm = LogManager {
            path: path.to_path_buf(),
            checkpoint_every,
            state: Mutex::new(LogState {
                buf: Vec::new(),
                next_lsn: 1,
                commits: 0,
                file,
            }),
        };
        let max = lm.read_entries()?.last().map(|e| e.lsn).unwrap_or(0);
        lm.state.lock().next_lsn = max + 1;
        Ok(lm)
    }

    /// Append an entry to the buffer, assigning its LSN and timestamp.
    pub fn append(&self, mut entry: LogEntry) -> u64 {
        let mut st = self.state.lock();
        entry.lsn = st.next_lsn;
        entry.timestamp = util::micros_now();
        st.next_lsn += 1;
        let lsn = entry.lsn;
        st.buf.push(entry);
        lsn
    }

    /// Write the buffer out and sync.
    pub fn flush(&self) -> Result<()> {
        let mut st = self.state.lock();
        Self::flush_locked(&mut st)
    }

    fn flush_locked(st: &mut LogState) -> Result<()> {
        if st.buf.is_empty() {
            return Ok(());
        }
        let mut text = String::new();
        for e in &st.buf {
            text.push_str(&e.encode());
            text.push('\n');
        }
        st.file.write_all(text.as_bytes())?;
        st.file.sync_data()?;
        st.buf.clear();
        Ok(())
    }

    /// COMMIT: append, force, and every `checkpoint_every`-th commit of
    /// the session append a CHECKPOINT and force again.
    pub fn append_commit(&self, txn: u64) -> Result<u64> {
        let mut st = self.state.lock();
        let lsn = st.next_lsn;
        st.next_lsn += 1;
        st.buf.push(LogEntry {
            lsn,
            timestamp: util::micros_now(),
            ..LogEntry::commit(txn)
        });
        Self::flush_locked(&mut st)?;
        st.commits += 1;
        if st.commits % self.checkpoint_every == 0 {
            let cp = st.next_lsn;
            st.next_lsn += 1;
            st.buf.push(LogEntry {
                lsn: cp,
                timestamp: util::micros_now(),
                ..LogEntry::checkpoint()
            });
            Self::flush_locked(&mut st)?;
            info!("checkpoint at lsn {} after {} commits", cp, st.commits);
        }
        Ok(lsn)
    }

    /// Read every entry from disk. The final line, if unreadable, is
    /// assumed to be a crash-truncated write and discarded; any earlier
    /// unreadable line or LSN ordering violation is corruption.
    pub fn read_entries(&self) -> Result<Vec<LogEntry>> {
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let lines: Vec<String> = reader.lines().collect::<std::io::Result<_>>()?;
        let mut entries = Vec::with_capacity(lines.len());
        let last = lines.len().saturating_sub(1);
        for (i, line) in lines.iter().enumerate() {
            if line.is_empty() {
                continue;
            }
            match LogEntry::decode(line) {
                Some(e) => entries.push(e),
                None if i == last => {
                    warn!("discarding truncated final log entry");
                }
                None => {
                    return Err(Error::LogCorrupt {
                        lsn: entries.last().map(|e| e.lsn).unwrap_or(0),
                        msg: format!("unreadable entry at line {}", i + 1),
                    })
                }
            }
        }
        for pair in entries.windows(2) {
            if pair[1].lsn <= pair[0].lsn {
                return Err(Error::LogCorrupt {
                    lsn: pair[1].lsn,
                    msg: format!("lsn {} follows {}", pair[1].lsn, pair[0].lsn),
                });
            }
        }
        Ok(entries)
    }

    /// Commits recorded this session ( checkpoint cadence counter ).
    pub fn session_commits(&self) -> u64 {
        self.state.lock().commits
    }
}

/// What recovery did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub redo_applied: u64,
    pub undone_txns: Vec<u64>,
    /// Highest transaction id seen in the log; fresh ids must start
    /// above it so epochs never collide.
    pub max_txn: u64,
}

/// Restart recovery. Finds the most recent CHECKPOINT, replays committed
/// work forward from it ( REDO ), rolls active-at-crash transactions
/// back in reverse ( UNDO ) appending a synthetic ABORT for each. The
/// lock table is rebuilt empty by the caller simply constructing a fresh
/// lock manager.
pub fn recover(storage: &StorageEngine, log: &LogManager) -> Result<RecoveryReport> {
    let entries = log.read_entries()?;
    if entries.is_empty() {
        return Ok(RecoveryReport::default());
    }

    let mut begun = FxHashSet::default();
    let mut finished = FxHashSet::default();
    for e in &entries {
        match e.op {
            LogOp::Begin => {
                begun.insert(e.txn);
            }
            LogOp::Commit | LogOp::Abort => {
                finished.insert(e.txn);
            }
            _ => {}
        }
    }
    let committed: FxHashSet<u64> = entries
        .iter()
        .filter(|e| e.op == LogOp::Commit)
        .map(|e| e.txn)
        .collect();
    let active: Vec<u64> = {
        let mut v: Vec<u64> = begun.difference(&finished).copied().collect();
        v.sort_unstable();
        v
    };

    let checkpoint = entries
        .iter()
        .rposition(|e| e.op == LogOp::Checkpoint)
        .map(|i| i + 1)
        .unwrap_or(0);

    let mut report = RecoveryReport {
        max_txn: entries.iter().map(|e| e.txn).max().unwrap_or(0),
        ..RecoveryReport::default()
    };

    // REDO: re-apply committed after-images forward from the checkpoint.
    for e in &entries[checkpoint..] {
        if !e.op.is_data() || !committed.contains(&e.txn) {
            continue;
        }
        let outcome = match e.op {
            LogOp::Insert | LogOp::Update => match &e.after {
                Some(img) => storage.upsert_row(&e.table, img),
                None => missing_image(e),
            },
            LogOp::Delete => storage.delete_row_if_present(&e.table, &e.rid),
            _ => unreachable!(),
        };
        outcome.map_err(|err| redo_failed(e, err))?;
        report.redo_applied += 1;
    }

    // UNDO: walk each unfinished transaction's entries in reverse,
    // re-applying before-images.
    let mut per_txn: FxHashMap<u64, Vec<&LogEntry>> = FxHashMap::default();
    for e in &entries {
        if e.op.is_data() && begun.contains(&e.txn) && !finished.contains(&e.txn) {
            per_txn.entry(e.txn).or_default().push(e);
        }
    }
    for txn in &active {
        if let Some(list) = per_txn.get(txn) {
            for e in list.iter().rev() {
                let outcome = match e.op {
                    LogOp::Insert => storage.delete_row_if_present(&e.table, &e.rid),
                    LogOp::Update | LogOp::Delete => match &e.before {
                        Some(img) => storage.upsert_row(&e.table, img),
                        None => missing_image(e),
                    },
                    _ => unreachable!(),
                };
                outcome.map_err(|err| redo_failed(e, err))?;
            }
        }
        log.append(LogEntry::abort(*txn));
        report.undone_txns.push(*txn);
    }
    log.flush()?;
    if report.redo_applied > 0 || !report.undone_txns.is_empty() {
        info!(
            "recovery: {} redo entries applied, {} transactions undone",
            report.redo_applied,
            report.undone_txns.len()
        );
    }
    Ok(report)
}

fn missing_image(e: &LogEntry) -> Result<()> {
    Err(Error::LogCorrupt {
        lsn: e.lsn,
        msg: format!("{} entry without image", e.op.as_str()),
    })
}

fn redo_failed(e: &LogEntry, err: Error) -> Error {
    match err {
        corrupt @ Error::LogCorrupt { .. } => corrupt,
        other => Error::RecoveryFailed(format!("at lsn {}: {}", e.lsn, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Column, Schema};
    use crate::value::{DataType, Value};
    use std::io::Write as _;
    use tempfile::TempDir;

    fn sample_row(rid: &str, bal: i32) -> Row {
        let mut r = Row::new(rid);
        r.set("id", Value::Int(1));
        r.set("bal", Value::Int(bal));
        r
    }

    #[test]
    fn entry_line_round_trip() {
        let mut e = LogEntry::update(7, "accounts", sample_row("accounts-1", 1000), {
            let mut r = sample_row("accounts-1", 900);
            r.set("note", Value::Str("a|b".into()));
            r
        });
        e.lsn = 42;
        e.timestamp = 99;
        let line = e.encode();
        assert_eq!(line.matches('|').count(), 7);
        let back = LogEntry::decode(&line).unwrap();
        assert_eq!(back.lsn, 42);
        assert_eq!(back.txn, 7);
        assert_eq!(back.op, LogOp::Update);
        assert_eq!(back.table, "accounts");
        assert_eq!(back.rid, "accounts-1");
        assert_eq!(
            back.before.unwrap().get("bal"),
            Some(&Value::Int(1000))
        );
        let after = back.after.unwrap();
        assert_eq!(after.get("bal"), Some(&Value::Int(900)));
        assert_eq!(after.get("note"), Some(&Value::Str("a|b".into())));
    }

    #[test]
    fn lsns_are_strictly_monotonic() {
        let dir = TempDir::new().unwrap();
        let log = LogManager::open(&dir.path().join("wal.log"), 10).unwrap();
        for txn in 1..=5 {
            log.append(LogEntry::begin(txn));
            log.append_commit(txn).unwrap();
        }
        let entries = log.read_entries().unwrap();
        for pair in entries.windows(2) {
            assert!(pair[1].lsn > pair[0].lsn);
        }
    }

    #[test]
    fn begin_does_not_force_commit_does() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.log");
        let log = LogManager::open(&path, 10).unwrap();
        log.append(LogEntry::begin(1));
        assert!(log.read_entries().unwrap().is_empty());
        log.append_commit(1).unwrap();
        let entries = log.read_entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].op, LogOp::Begin);
        assert_eq!(entries[1].op, LogOp::Commit);
    }

    #[test]
    fn tenth_commit_checkpoints_ninth_does_not() {
        let dir = TempDir::new().unwrap();
        let log = LogManager::open(&dir.path().join("wal.log"), 10).unwrap();
        for txn in 1..=9 {
            log.append(LogEntry::begin(txn));
            log.append_commit(txn).unwrap();
        }
        let entries = log.read_entries().unwrap();
        assert!(entries.iter().all(|e| e.op != LogOp::Checkpoint));
        log.append(LogEntry::begin(10));
        log.append_commit(10).unwrap();
        let entries = log.read_entries().unwrap();
        // 10 begins + 10 commits + 1 checkpoint.
        assert!(entries.len() >= 21);
        assert_eq!(entries.last().unwrap().op, LogOp::Checkpoint);
    }

    #[test]
    fn truncated_tail_is_discarded_interior_garbage_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.log");
        let log = LogManager::open(&path, 10).unwrap();
        log.append(LogEntry::begin(1));
        log.append_commit(1).unwrap();
        drop(log);
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(b"3|123|2|INS").unwrap(); // torn write
        }
        let log = LogManager::open(&path, 10).unwrap();
        assert_eq!(log.read_entries().unwrap().len(), 2);

        // The same garbage mid-file is corruption.
        let mut lines: Vec<String> = std::fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(String::from)
            .collect();
        lines.insert(1, "3|123|2|INS".to_string());
        std::fs::write(&path, lines.join("\n")).unwrap();
        assert!(matches!(
            log.read_entries(),
            Err(Error::LogCorrupt { .. })
        ));
    }

    #[test]
    fn out_of_order_lsn_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.log");
        std::fs::write(&path, "5|1|1|BEGIN||||\n3|2|1|COMMIT||||\n").unwrap();
        let log = LogManager::open(&path, 10);
        assert!(matches!(log, Err(Error::LogCorrupt { lsn: 3, .. })));
    }

    fn accounts(storage: &StorageEngine) {
        storage
            .create_table(&Schema::new(
                "accounts",
                vec![
                    Column::new("id", DataType::Int),
                    Column::new("bal", DataType::Int),
                ],
            ))
            .unwrap();
    }

    #[test]
    fn undo_restores_before_image_after_crash() {
        let dir = TempDir::new().unwrap();
        let storage = StorageEngine::new(dir.path()).unwrap();
        accounts(&storage);
        let row = storage
            .insert(
                "accounts",
                &[
                    ("id".to_string(), Value::Int(1)),
                    ("bal".to_string(), Value::Int(1000)),
                ],
            )
            .unwrap();

        let path = dir.path().join("wal.log");
        {
            // Txn 7 updates bal to 900, flushes the WAL, then "crashes"
            // before COMMIT.
            let log = LogManager::open(&path, 10).unwrap();
            log.append(LogEntry::begin(7));
            let (before, after) = storage
                .update_row("accounts", &row.rid, &[("bal".to_string(), Value::Int(900))])
                .unwrap();
            log.append(LogEntry::update(7, "accounts", before, after));
            log.flush().unwrap();
        }

        let log = LogManager::open(&path, 10).unwrap();
        let report = recover(&storage, &log).unwrap();
        assert_eq!(report.undone_txns, vec![7]);

        let got: Vec<Row> = storage
            .read("accounts", &[])
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(got[0].get("bal"), Some(&Value::Int(1000)));

        // A synthetic ABORT now terminates txn 7; recovery is idempotent.
        let entries = log.read_entries().unwrap();
        assert_eq!(entries.last().unwrap().op, LogOp::Abort);
        assert_eq!(entries.last().unwrap().txn, 7);
        let again = recover(&storage, &log).unwrap();
        assert!(again.undone_txns.is_empty());
    }

    #[test]
    fn redo_reapplies_committed_work() {
        let dir = TempDir::new().unwrap();
        let storage = StorageEngine::new(dir.path()).unwrap();
        accounts(&storage);
        let row = storage
            .insert(
                "accounts",
                &[
                    ("id".to_string(), Value::Int(1)),
                    ("bal".to_string(), Value::Int(500)),
                ],
            )
            .unwrap();

        let path = dir.path().join("wal.log");
        {
            let log = LogManager::open(&path, 10).unwrap();
            log.append(LogEntry::begin(3));
            let (before, after) = storage
                .update_row("accounts", &row.rid, &[("bal".to_string(), Value::Int(750))])
                .unwrap();
            log.append(LogEntry::update(3, "accounts", before, after));
            log.append_commit(3).unwrap();
        }
        // Simulate losing the data write: put the old value back by hand.
        storage
            .update_row("accounts", &row.rid, &[("bal".to_string(), Value::Int(500))])
            .unwrap();

        let log = LogManager::open(&path, 10).unwrap();
        let report = recover(&storage, &log).unwrap();
        assert_eq!(report.redo_applied, 1);
        let got: Vec<Row> = storage
            .read("accounts", &[])
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(got[0].get("bal"), Some(&Value::Int(750)));
    }
}
