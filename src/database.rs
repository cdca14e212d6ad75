use std::{
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use tracing::{debug, info, warn};

use crate::{
    BufferPool, HeapFile, Result, StorageConfig, TableId, TransactionId, TupleDesc,
};

/// One storage engine instance: a buffer pool, its lock table and the tables
/// registered with it. Everything that touches pages goes through here; there are
/// no process-wide singletons, so independent instances can coexist in one process.
#[derive(Debug)]
pub struct Database {
    config: StorageConfig,
    pool: Arc<BufferPool>,
    next_txn: AtomicU64,
}

impl Database {
    pub fn new(config: StorageConfig) -> Result<Self> {
        config.validate()?;
        info!(
            page_size = config.page_size,
            pool_pages = config.pool_pages,
            lock_timeout = ?config.lock_timeout,
            "starting storage engine"
        );
        Ok(Self {
            pool: Arc::new(BufferPool::new(&config)),
            config,
            next_txn: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Open or create the table file at `path` and register it with the pool
    pub fn open_table<P: AsRef<Path>>(&self, path: P, desc: Arc<TupleDesc>) -> Result<Arc<HeapFile>> {
        let file = Arc::new(HeapFile::open(path, desc, self.config.page_size)?);
        self.pool.register_table(Arc::clone(&file));
        Ok(file)
    }

    pub fn table(&self, table_id: TableId) -> Result<Arc<HeapFile>> {
        self.pool.table(table_id)
    }

    pub fn begin_transaction(&self) -> TransactionId {
        let txn = TransactionId(self.next_txn.fetch_add(1, Ordering::SeqCst));
        debug!(%txn, "begin transaction");
        txn
    }

    pub fn transaction_complete(&self, txn: TransactionId, commit: bool) -> Result<()> {
        self.pool.transaction_complete(txn, commit)
    }

    pub fn commit(&self, txn: TransactionId) -> Result<()> {
        self.transaction_complete(txn, true)
    }

    pub fn abort(&self, txn: TransactionId) -> Result<()> {
        self.transaction_complete(txn, false)
    }

    /// Run `body` in a fresh transaction and commit it. If the body (or the commit)
    /// fails because the transaction was aborted, the transaction is rolled back and
    /// `body` runs again in a new one, up to `max_attempts` times in total. Any other
    /// error rolls back and is returned as is.
    pub fn run_transaction<T, F>(&self, max_attempts: usize, mut body: F) -> Result<T>
    where
        F: FnMut(TransactionId) -> Result<T>,
    {
        let mut attempt = 1;
        loop {
            let txn = self.begin_transaction();
            let outcome = body(txn).and_then(|value| self.commit(txn).map(|()| value));
            match outcome {
                Ok(value) => return Ok(value),
                Err(e) => {
                    //  a failed commit has already released its locks; aborting again is harmless
                    self.abort(txn)?;
                    if !e.is_aborted() || attempt >= max_attempts {
                        return Err(e);
                    }
                    warn!(%txn, attempt, error = %e, "transaction aborted, retrying");
                    attempt += 1;
                }
            }
        }
    }
}
