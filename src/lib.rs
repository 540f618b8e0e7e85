//!
//! Teaching relational database engine with an SQL-like language.
//!
//! A statement travels: SQL text -> lexer -> parser -> logical query ->
//! optimizer ( rewrite, candidate plans, cost, cache ) -> plan tree ->
//! operator engine ( pull-based row streams ) -> result envelope.
//! Writes additionally acquire exclusive locks through the lock manager
//! and append their entries to the write-ahead log; commit forces the
//! log and releases the locks.
//!
//! Example:
//! ```no_run
//! use mdbms::{Database, EngineConfig};
//! use mdbms::record::{Column, Schema};
//! use mdbms::value::DataType;
//!
//! let cfg = EngineConfig::new(std::path::Path::new("./data"));
//! let db = Database::open(cfg).unwrap();
//! db.create_table(&Schema::new(
//!     "students",
//!     vec![
//!         Column::new("id", DataType::Int),
//!         Column::new("name", DataType::Str(16)),
//!         Column::new("gpa", DataType::Float),
//!     ],
//! )).unwrap();
//! let txn = db.begin();
//! let r = db.execute("INSERT INTO students VALUES (1, 'Alice', 3.5)", txn);
//! assert!(r.success);
//! db.commit(txn).unwrap();
//! ```
//!
//! General design: each table is one heap file ( header page carrying
//! the schema, then 4 KiB slotted data pages ). Hash indexes live in
//! memory and are rebuilt on install. Concurrency control is strict
//! two-phase locking with wait-die deadlock avoidance; durability is a
//! write-ahead log with REDO/UNDO recovery and periodic checkpoints.

use crate::cache::PlanCache;
use crate::err::{Error, Result};
use crate::exec::{execute, is_dml, ExecCtx};
use crate::lock::LockManager;
use crate::optimize::Optimizer;
use crate::plan::QueryPlan;
use crate::record::{Row, Schema};
use crate::storage::StorageEngine;
use crate::txn::TransactionManager;
use crate::wal::LogManager;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Plan cache, keyed by canonical query signature.
pub mod cache;

/// Error kinds and the crate result type.
pub mod err;

/// Operator engine: visitor execution of plan trees.
pub mod exec;

/// In-memory hash indexes.
pub mod index;

/// Strict two-phase lock manager.
pub mod lock;

/// Query optimizer: rewrites, candidates, costing.
pub mod optimize;

/// SQL lexer and parser.
pub mod parse;

/// Slotted 4 KiB pages.
pub mod page;

/// Physical plan trees.
pub mod plan;

/// Logical query model.
pub mod query;

/// Schema, rows and the record codec.
pub mod record;

/// Heap file storage engine.
pub mod storage;

/// Transaction lifecycle.
pub mod txn;

/// Byte-level helpers.
pub mod util;

/// Run-time values and column types.
pub mod value;

/// Write-ahead log and recovery.
pub mod wal;

#[cfg(test)]
mod test;

/// `Arc<Database>`.
pub type DB = Arc<Database>;

/// Engine configuration, owned by the top-level handle. The process-wide
/// concerns of the source design ( plan cache, index map, LSN counter )
/// all live behind this engine instead of globals.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding table files and the log.
    pub data_dir: PathBuf,
    /// A CHECKPOINT entry is appended every this many commits.
    pub checkpoint_every: u64,
    /// Plan cache capacity.
    pub plan_cache_capacity: usize,
    /// Plan cache time-to-live.
    pub plan_cache_ttl: Duration,
}

impl EngineConfig {
    pub fn new(data_dir: &Path) -> EngineConfig {
        EngineConfig {
            data_dir: data_dir.to_path_buf(),
            checkpoint_every: 10,
            plan_cache_capacity: cache::DEFAULT_CAPACITY,
            plan_cache_ttl: cache::DEFAULT_TTL,
        }
    }
}

/// What a statement produced.
#[derive(Debug, Serialize)]
pub enum ResultData {
    /// SELECT output, fully materialized for the caller: either the
    /// whole resultset arrived or none of it did.
    Rows(Vec<Row>),
    /// Rows affected by a write.
    Count(usize),
    /// Nothing ( failed statements ).
    None,
}

/// Result envelope handed to the external caller.
#[derive(Debug, Serialize)]
pub struct QueryResult {
    pub success: bool,
    pub message: String,
    pub transaction_id: u64,
    pub data: ResultData,
}

impl QueryResult {
    fn ok(txn: u64, data: ResultData) -> QueryResult {
        QueryResult {
            success: true,
            message: String::new(),
            transaction_id: txn,
            data,
        }
    }

    fn fail(txn: u64, e: &Error) -> QueryResult {
        QueryResult {
            success: false,
            message: format!("{}: {}", e.kind(), e),
            transaction_id: txn,
            data: ResultData::None,
        }
    }

    /// The rows of a successful SELECT.
    pub fn rows(&self) -> &[Row] {
        match &self.data {
            ResultData::Rows(rows) => rows,
            _ => &[],
        }
    }

    /// The affected-row count of a successful write.
    pub fn count(&self) -> usize {
        match &self.data {
            ResultData::Count(n) => *n,
            ResultData::Rows(rows) => rows.len(),
            ResultData::None => 0,
        }
    }
}

/// The engine: storage, locks, log, transactions and the plan cache
/// behind one handle.
pub struct Database {
    pub cfg: EngineConfig,
    pub storage: Arc<StorageEngine>,
    pub locks: Arc<LockManager>,
    pub log: Arc<LogManager>,
    pub txns: Arc<TransactionManager>,
    pub plans: Arc<PlanCache>,
}

impl Database {
    /// Open the engine over a data directory, running restart recovery
    /// against whatever log is found there. The lock table starts empty;
    /// no stale locks survive a restart.
    pub fn open(cfg: EngineConfig) -> Result<DB> {
        let storage = Arc::new(StorageEngine::new(&cfg.data_dir)?);
        let log = Arc::new(LogManager::open(
            &cfg.data_dir.join("mdbms.log"),
            cfg.checkpoint_every,
        )?);
        let report = wal::recover(&storage, &log)?;
        let plans = Arc::new(PlanCache::new(cfg.plan_cache_capacity, cfg.plan_cache_ttl));
        Ok(Arc::new(Database {
            cfg,
            storage,
            locks: Arc::new(LockManager::new()),
            log,
            txns: Arc::new(TransactionManager::starting_after(report.max_txn)),
            plans,
        }))
    }

    /// Seeder surface: write a table file ( header page with the schema ).
    pub fn create_table(&self, schema: &Schema) -> Result<()> {
        self.storage.create_table(schema)
    }

    /// Install a hash index over ( table, column ).
    pub fn set_index(&self, table: &str, column: &str) -> Result<()> {
        self.storage.set_index(table, column)
    }

    /// Start a transaction; BEGIN is logged but not forced.
    pub fn begin(&self) -> u64 {
        self.txns.begin(&self.log)
    }

    /// Commit: force the log, release locks. False when the transaction
    /// is unknown or already finished.
    pub fn commit(&self, txn: u64) -> Result<bool> {
        self.txns.commit(txn, &self.log, &self.locks)
    }

    /// Abort: compensate writes, append ABORT, release locks.
    pub fn abort(&self, txn: u64) -> Result<bool> {
        self.txns.abort(txn, &self.log, &self.locks, &self.storage)
    }

    /// Is the transaction ACTIVE?
    pub fn is_active(&self, txn: u64) -> bool {
        self.txns.is_active(txn)
    }

    /// Plan a statement without executing it, going through the cache.
    pub fn plan(&self, sql: &str) -> Result<QueryPlan> {
        let stmt = parse::parse(sql)?;
        let signature = stmt.signature();
        if let Some(plan) = self.plans.get(&signature) {
            return Ok(plan);
        }
        let plan = Optimizer::new(&self.storage).optimize(&stmt)?;
        self.plans.set(&signature, plan.clone());
        Ok(plan)
    }

    /// Execute one statement under a transaction and assemble the result
    /// envelope. Parse and plan errors return before any state change;
    /// lock and storage errors during execution abort the transaction.
    pub fn execute(&self, sql: &str, txn: u64) -> QueryResult {
        // Phase 1: parse and plan. Failures here need no rollback.
        let plan = match self.prepare(sql, txn) {
            Ok(plan) => plan,
            Err(e) => return QueryResult::fail(txn, &e),
        };
        // Phase 2: run the operator tree.
        match self.run_plan(&plan, txn) {
            Ok(data) => QueryResult::ok(txn, data),
            Err(e) => {
                if !matches!(e, Error::Aborted(_)) {
                    let _ = self.abort(txn);
                }
                QueryResult::fail(txn, &e)
            }
        }
    }

    fn prepare(&self, sql: &str, txn: u64) -> Result<QueryPlan> {
        if !self.txns.is_active(txn) {
            return Err(Error::Aborted(txn));
        }
        self.plan(sql)
    }

    fn run_plan(&self, plan: &QueryPlan, txn: u64) -> Result<ResultData> {
        let ctx = ExecCtx {
            storage: self.storage.clone(),
            locks: self.locks.clone(),
            log: self.log.clone(),
            txns: self.txns.clone(),
            txn,
            read_locks: true,
        };
        let rows: Vec<Row> = execute(&ctx, &plan.root)?.collect::<Result<_>>()?;
        Ok(if is_dml(&plan.root) {
            ResultData::Count(rows.len())
        } else {
            ResultData::Rows(rows)
        })
    }
}
