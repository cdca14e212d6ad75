use std::{fmt, io};

use thiserror::Error;

use crate::{PageId, TransactionId};

pub type Result<T> = std::result::Result<T, StorageError>;

/// Why the lock coordinator gave up on a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    Deadlock,
    LockTimeout,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Deadlock => write!(f, "wait-for cycle detected"),
            AbortReason::LockTimeout => write!(f, "timed out waiting for lock"),
        }
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("corrupt page {page_id}: {detail}")]
    CorruptPage { page_id: PageId, detail: String },

    #[error("short read on {page_id}: expected {expected} bytes, got {actual}")]
    ShortRead {
        page_id: PageId,
        expected: usize,
        actual: usize,
    },

    #[error("short write on {page_id}")]
    ShortWrite { page_id: PageId },

    #[error("page {0} has no empty slot")]
    PageFull(PageId),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("tuple does not live on page {0}")]
    TupleNotOnThisPage(PageId),

    #[error("slot {slot} on page {page_id} is not occupied")]
    SlotNotOccupied { page_id: PageId, slot: usize },

    #[error("tuple has no record id")]
    MissingRecordId,

    #[error("buffer pool is full: all {0} cached pages are dirty or in use")]
    BufferPoolFull(usize),

    #[error("transaction {txn} aborted: {reason}")]
    TransactionAborted {
        txn: TransactionId,
        reason: AbortReason,
    },

    #[error("iterator has no further tuples")]
    NoSuchElement,

    #[error("no table registered with id {0}")]
    UnknownTable(u32),

    #[error("{page_id} is past the end of a {page_count}-page file")]
    PageOutOfRange { page_id: PageId, page_count: usize },

    #[error("string of {len} bytes exceeds field width {max}")]
    FieldTooLong { len: usize, max: usize },

    #[error("invalid tuple layout: {0}")]
    InvalidLayout(String),

    #[error("invalid storage config: {0}")]
    InvalidConfig(String),

    #[error("unsupported aggregate: {0}")]
    UnsupportedAggregate(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl StorageError {
    /// True when the caller should abort and may retry the whole transaction
    pub fn is_aborted(&self) -> bool {
        matches!(self, StorageError::TransactionAborted { .. })
    }
}
