use thiserror::Error;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong between SQL text and rows on disk.
///
/// Parse and plan errors return before any state change. Storage and lock
/// errors during execution abort the enclosing transaction. Recovery errors
/// surface from engine construction and are fatal to the caller.
#[derive(Error, Debug)]
pub enum Error {
    #[error("syntax error at position {pos}: expected {expected}, found {found}")]
    Syntax {
        pos: usize,
        expected: String,
        found: String,
    },

    #[error("unsupported construct: {0}")]
    Unsupported(String),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("page corrupt: {0}")]
    PageCorrupt(String),

    #[error("record does not fit page after update: {0}")]
    OverflowOnUpdate(String),

    #[error("transaction {txn} denied {mode} lock on {object}")]
    LockConflict {
        txn: u64,
        object: String,
        mode: &'static str,
    },

    #[error("transaction {txn} aborted by wait-die on {object}")]
    Deadlock { txn: u64, object: String },

    #[error("log corrupt at lsn {lsn}: {msg}")]
    LogCorrupt { lsn: u64, msg: String },

    #[error("recovery failed: {0}")]
    RecoveryFailed(String),

    #[error("internal invariant violated: {0}")]
    Invariant(String),

    #[error("transaction {0} is not active")]
    Aborted(u64),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Short kind tag used in result envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Syntax { .. } => "SyntaxError",
            Error::Unsupported(_) => "UnsupportedConstruct",
            Error::TableNotFound(_) => "TableNotFound",
            Error::SchemaMismatch(_) => "SchemaMismatch",
            Error::PageCorrupt(_) => "PageCorrupt",
            Error::OverflowOnUpdate(_) => "OverflowOnUpdate",
            Error::LockConflict { .. } => "LockConflict",
            Error::Deadlock { .. } => "Deadlock",
            Error::LogCorrupt { .. } => "LogCorrupt",
            Error::RecoveryFailed(_) => "RecoveryFailed",
            Error::Invariant(_) => "InternalInvariant",
            Error::Aborted(_) => "Aborted",
            Error::Io(_) => "Io",
        }
    }
}
