//! The shared page cache and the entry point for every page access.
//!
//! - `BufferPool`: bounded map from [`PageId`] to cached [`HeapPage`], fronted by
//!   the page-level lock table
//! - `BufferStats`: hit/miss counters
//!
//! A fetched page is handed out as a [`PageRef`]. The `RwLock` around each page is a
//! short-term latch guarding the bytes; isolation between transactions comes from
//! the page locks taken in [`BufferPool::get_page`], which are held until
//! [`BufferPool::transaction_complete`].
//!
//! Dirty pages are never written before their transaction commits and never evicted,
//! so a pool full of dirty pages fails the next miss with
//! [`StorageError::BufferPoolFull`].

mod stats;

use std::{collections::HashMap, sync::Arc};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

pub use stats::BufferStats;

use crate::{
    lock_manager::{LockMode, LockTable},
    replacement::PolicyState,
    HeapFile, HeapPage, PageId, Result, StorageConfig, StorageError, TableId, TransactionId,
    Tuple,
};

/// A cached page. Take `read()`/`write()` only for the duration of an access.
pub type PageRef = Arc<RwLock<HeapPage>>;

/// What the caller intends to do with a fetched page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permissions {
    ReadOnly,
    ReadWrite,
}

impl Permissions {
    fn lock_mode(self) -> LockMode {
        match self {
            Permissions::ReadOnly => LockMode::Shared,
            Permissions::ReadWrite => LockMode::Exclusive,
        }
    }
}

#[derive(Debug)]
struct PoolState {
    pages: HashMap<PageId, PageRef>,
    policy: PolicyState,
}

#[derive(Debug)]
pub struct BufferPool {
    capacity: usize,
    page_size: usize,
    state: Mutex<PoolState>,
    lock_table: LockTable,
    files: RwLock<HashMap<TableId, Arc<HeapFile>>>,
    stats: BufferStats,
}

impl BufferPool {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            capacity: config.pool_pages,
            page_size: config.page_size,
            state: Mutex::new(PoolState {
                pages: HashMap::with_capacity(config.pool_pages),
                policy: PolicyState::new(),
            }),
            lock_table: LockTable::new(config.lock_timeout),
            files: RwLock::new(HashMap::new()),
            stats: BufferStats::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn stats(&self) -> &BufferStats {
        &self.stats
    }

    /// Make a table's pages reachable through the pool. Re-registering an id
    /// replaces the previous file.
    pub fn register_table(&self, file: Arc<HeapFile>) {
        if file.page_size() != self.page_size {
            warn!(
                table_id = file.id(),
                file_page_size = file.page_size(),
                pool_page_size = self.page_size,
                "registering table with a page size different from the pool's"
            );
        }
        self.files.write().insert(file.id(), file);
    }

    pub fn table(&self, table_id: TableId) -> Result<Arc<HeapFile>> {
        self.files
            .read()
            .get(&table_id)
            .cloned()
            .ok_or(StorageError::UnknownTable(table_id))
    }

    /// Fetch a page on behalf of `txn`, first acquiring the page lock that
    /// `perms` implies. Blocks while another transaction holds a conflicting lock.
    ///
    /// A miss with a full cache evicts one clean page nobody else references;
    /// if there is none the fetch fails with [`StorageError::BufferPoolFull`].
    pub fn get_page(&self, txn: TransactionId, page_id: PageId, perms: Permissions) -> Result<PageRef> {
        self.lock_table.acquire(txn, page_id, perms.lock_mode())?;

        let mut state = self.state.lock();
        if let Some(page) = state.pages.get(&page_id).cloned() {
            state.policy.record_access(page_id);
            self.stats.record_hit();
            return Ok(page);
        }
        self.stats.record_miss();

        let file = self.table(page_id.table_id)?;
        if state.pages.len() >= self.capacity {
            self.evict_page(&mut state)?;
        }
        let page = Arc::new(RwLock::new(file.read_page(page_id)?));
        state.pages.insert(page_id, Arc::clone(&page));
        state.policy.on_insert(page_id);
        debug!(%txn, %page_id, ?perms, "loaded page into pool");
        Ok(page)
    }

    /// Drop one page from the cache. Only clean pages with no reference outside
    /// the pool qualify: a dirty page belongs to an uncommitted transaction, and a
    /// referenced one may be about to be modified through that reference.
    fn evict_page(&self, state: &mut PoolState) -> Result<()> {
        let PoolState { pages, policy } = state;
        let victim = policy.victim(|page_id| {
            pages.get(&page_id).is_some_and(|page| {
                Arc::strong_count(page) == 1
                    && page.try_read().is_some_and(|page| !page.is_dirty())
            })
        });
        let Some(victim) = victim else {
            warn!(capacity = self.capacity, "no evictable page in buffer pool");
            return Err(StorageError::BufferPoolFull(self.capacity));
        };
        pages.remove(&victim);
        policy.remove(victim);
        self.stats.record_eviction();
        debug!(page_id = %victim, "evicted page");
        Ok(())
    }

    /// Write the page to disk if it is cached and dirty, then mark it clean. The
    /// page stays cached.
    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        let Some(page) = self.state.lock().pages.get(&page_id).cloned() else {
            return Ok(());
        };
        self.write_back(&page)
    }

    fn write_back(&self, page: &PageRef) -> Result<()> {
        let mut page = page.write();
        if !page.is_dirty() {
            return Ok(());
        }
        self.table(page.id().table_id)?.write_page(&page)?;
        debug!(page_id = %page.id(), dirtier = ?page.dirtier(), "flushed page");
        page.mark_dirty(None);
        Ok(())
    }

    /// Write every dirty cached page regardless of which transaction dirtied it.
    /// This bypasses the no-steal rule and is meant for tests and shutdown.
    pub fn flush_all_pages(&self) -> Result<()> {
        let pages: Vec<PageRef> = self.state.lock().pages.values().cloned().collect();
        for page in &pages {
            self.write_back(page)?;
        }
        Ok(())
    }

    /// Drop the cached copy of a page without writing it
    pub fn discard_page(&self, page_id: PageId) {
        let mut state = self.state.lock();
        if state.pages.remove(&page_id).is_some() {
            state.policy.remove(page_id);
            debug!(%page_id, "discarded cached page");
        }
    }

    /// Give up `txn`'s lock on one page before the transaction ends. Only safe
    /// for pages the transaction neither modified nor depends on.
    pub fn release_page(&self, txn: TransactionId, page_id: PageId) {
        self.lock_table.release(txn, page_id);
    }

    pub fn holds_lock(&self, txn: TransactionId, page_id: PageId) -> bool {
        self.lock_table.holds_lock(txn, page_id)
    }

    pub fn lock_mode(&self, txn: TransactionId, page_id: PageId) -> Option<LockMode> {
        self.lock_table.lock_mode(txn, page_id)
    }

    pub fn is_cached(&self, page_id: PageId) -> bool {
        self.state.lock().pages.contains_key(&page_id)
    }

    pub fn cached_pages(&self) -> usize {
        self.state.lock().pages.len()
    }

    /// Insert into the registered table `table_id`, stamping the tuple's record id
    pub fn insert_tuple(&self, txn: TransactionId, table_id: TableId, tuple: &mut Tuple) -> Result<()> {
        let file = self.table(table_id)?;
        file.insert_tuple(self, txn, tuple)?;
        Ok(())
    }

    /// Delete the tuple from whichever table its record id names
    pub fn delete_tuple(&self, txn: TransactionId, tuple: &Tuple) -> Result<()> {
        let record_id = tuple.record_id().ok_or(StorageError::MissingRecordId)?;
        let file = self.table(record_id.page_id.table_id)?;
        file.delete_tuple(self, txn, tuple)?;
        Ok(())
    }

    /// Finish `txn`. On commit its dirty pages are written and marked clean; on
    /// abort they are dropped from the cache so the next fetch rereads the last
    /// committed image. Either way every lock it holds is released, even if a
    /// write fails.
    pub fn transaction_complete(&self, txn: TransactionId, commit: bool) -> Result<()> {
        let dirtied: Vec<(PageId, PageRef)> = self
            .state
            .lock()
            .pages
            .iter()
            .filter(|(_, page)| page.read().dirtier() == Some(txn))
            .map(|(page_id, page)| (*page_id, Arc::clone(page)))
            .collect();

        let result = if commit {
            dirtied.iter().try_for_each(|(_, page)| self.write_back(page))
        } else {
            for (page_id, _) in &dirtied {
                self.discard_page(*page_id);
            }
            Ok(())
        };

        let released = self.lock_table.release_all(txn);
        match &result {
            Ok(()) => debug!(
                %txn,
                commit,
                dirty_pages = dirtied.len(),
                locks = released.len(),
                "transaction complete"
            ),
            Err(e) => info!(%txn, commit, error = %e, "transaction completed with error"),
        }
        result
    }
}
