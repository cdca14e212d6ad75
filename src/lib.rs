//! A page-oriented heap storage engine.
//!
//! Tables are files of fixed-size slotted pages ([`HeapPage`]) managed by
//! [`HeapFile`]. Every page access goes through a bounded [`BufferPool`] that
//! enforces page-level strict two-phase locking with deadlock detection, and
//! writes a transaction's pages back only when it commits (no-steal, force).
//! [`Database`] ties a pool, its tables and transaction ids together.

pub mod aggregate;
pub mod benchmark_framework;
pub mod buffer_pool;
pub mod config;
pub mod database;
pub mod error;
pub mod heap_file;
pub mod ids;
mod lock_manager;
pub mod page;
mod replacement;
pub mod scan;
#[doc(hidden)]
pub mod test_utils;
pub mod tuple;
mod wait_for;

pub use aggregate::{AggregateOp, IntegerAggregator, StringAggregator};
pub use buffer_pool::{BufferPool, BufferStats, PageRef, Permissions};
pub use config::StorageConfig;
pub use database::Database;
pub use error::{AbortReason, Result, StorageError};
pub use heap_file::HeapFile;
pub use ids::{PageId, RecordId, TableId, TransactionId};
pub use lock_manager::LockMode;
pub use page::HeapPage;
pub use scan::{DbIterator, HeapScan, TupleIterator, Tuples};
pub use tuple::{Field, FieldType, TdItem, Tuple, TupleDesc};
