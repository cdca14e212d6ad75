use std::{
    collections::{HashMap, HashSet},
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use tracing::{trace, warn};

use crate::{
    error::AbortReason, wait_for::WaitForGraph, PageId, Result, StorageError, TransactionId,
};

/// Page lock modes. Shared locks are compatible with each other; an exclusive
/// lock is compatible with nothing held by another transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Default)]
struct LockState {
    shared: HashSet<TransactionId>,
    exclusive: Option<TransactionId>,
}

impl LockState {
    /// Transactions standing between `txn` and a grant of `mode`. Empty means
    /// grant now, which covers re-entrant requests and the sole-holder upgrade.
    fn blockers(&self, txn: TransactionId, mode: LockMode) -> Vec<TransactionId> {
        let mut blockers: Vec<TransactionId> =
            self.exclusive.into_iter().filter(|holder| *holder != txn).collect();
        if mode == LockMode::Exclusive {
            blockers.extend(self.shared.iter().copied().filter(|holder| *holder != txn));
        }
        blockers
    }

    fn is_free(&self) -> bool {
        self.shared.is_empty() && self.exclusive.is_none()
    }
}

#[derive(Debug, Default)]
struct LockTableState {
    locks: HashMap<PageId, LockState>,
    held: HashMap<TransactionId, HashSet<PageId>>,
    wait_for: WaitForGraph,
}

impl LockTableState {
    fn grant(&mut self, txn: TransactionId, page_id: PageId, mode: LockMode) {
        let lock = self.locks.entry(page_id).or_default();
        match mode {
            LockMode::Shared => {
                //  an exclusive holder already has every right a shared lock gives
                if lock.exclusive != Some(txn) {
                    lock.shared.insert(txn);
                }
            }
            LockMode::Exclusive => {
                lock.shared.remove(&txn);
                lock.exclusive = Some(txn);
            }
        }
        self.held.entry(txn).or_default().insert(page_id);
        self.wait_for.remove_waiter(txn);
    }

    fn release(&mut self, txn: TransactionId, page_id: PageId) {
        if let Some(lock) = self.locks.get_mut(&page_id) {
            lock.shared.remove(&txn);
            if lock.exclusive == Some(txn) {
                lock.exclusive = None;
            }
            if lock.is_free() {
                self.locks.remove(&page_id);
            }
        }
    }
}

/// Page-granularity strict two-phase locking.
///
/// Requests that cannot be granted block on a condition variable. Before each
/// wait the requester records who it waits on in the wait-for graph; if that
/// closes a cycle through the requester, the requester is the one aborted. A
/// request still blocked when the timeout expires aborts as well.
#[derive(Debug)]
pub(crate) struct LockTable {
    state: Mutex<LockTableState>,
    cond_var: Condvar,
    timeout: Duration,
}

impl LockTable {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            state: Mutex::new(LockTableState::default()),
            cond_var: Condvar::new(),
            timeout,
        }
    }

    /// Block until `txn` holds `mode` on `page_id`, or fail with
    /// [`StorageError::TransactionAborted`]
    pub(crate) fn acquire(&self, txn: TransactionId, page_id: PageId, mode: LockMode) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        let mut state = self.state.lock();
        loop {
            let blockers = state
                .locks
                .get(&page_id)
                .map(|lock| lock.blockers(txn, mode))
                .unwrap_or_default();
            if blockers.is_empty() {
                state.grant(txn, page_id, mode);
                trace!(%txn, %page_id, ?mode, "granted lock");
                return Ok(());
            }

            state.wait_for.set_waits(txn, blockers.iter().copied());
            if let Some(cycle) = state.wait_for.find_cycle(txn) {
                state.wait_for.remove_waiter(txn);
                warn!(%txn, %page_id, ?mode, ?cycle, "deadlock detected, aborting requester");
                return Err(StorageError::TransactionAborted {
                    txn,
                    reason: AbortReason::Deadlock,
                });
            }

            if Instant::now() >= deadline {
                state.wait_for.remove_waiter(txn);
                warn!(%txn, %page_id, ?mode, ?blockers, timeout = ?self.timeout, "lock wait timed out");
                return Err(StorageError::TransactionAborted {
                    txn,
                    reason: AbortReason::LockTimeout,
                });
            }

            trace!(%txn, %page_id, ?mode, ?blockers, "waiting for lock");
            self.cond_var.wait_until(&mut state, deadline);
        }
    }

    /// Release whatever `txn` holds on a single page
    pub(crate) fn release(&self, txn: TransactionId, page_id: PageId) {
        let mut state = self.state.lock();
        state.release(txn, page_id);
        if let Some(pages) = state.held.get_mut(&txn) {
            pages.remove(&page_id);
            if pages.is_empty() {
                state.held.remove(&txn);
            }
        }
        self.cond_var.notify_all();
    }

    /// Release every lock `txn` holds and forget it in the wait-for graph.
    /// Returns the pages it had locked.
    pub(crate) fn release_all(&self, txn: TransactionId) -> HashSet<PageId> {
        let mut state = self.state.lock();
        let pages = state.held.remove(&txn).unwrap_or_default();
        for page_id in &pages {
            state.release(txn, *page_id);
        }
        state.wait_for.remove_txn(txn);
        self.cond_var.notify_all();
        trace!(%txn, released = pages.len(), "released all locks");
        pages
    }

    pub(crate) fn holds_lock(&self, txn: TransactionId, page_id: PageId) -> bool {
        self.lock_mode(txn, page_id).is_some()
    }

    /// The strongest mode `txn` holds on `page_id`
    pub(crate) fn lock_mode(&self, txn: TransactionId, page_id: PageId) -> Option<LockMode> {
        let state = self.state.lock();
        let lock = state.locks.get(&page_id)?;
        if lock.exclusive == Some(txn) {
            Some(LockMode::Exclusive)
        } else if lock.shared.contains(&txn) {
            Some(LockMode::Shared)
        } else {
            None
        }
    }

    #[cfg(test)]
    pub(crate) fn has_exclusive_holder(&self, page_id: PageId) -> bool {
        self.state
            .lock()
            .locks
            .get(&page_id)
            .is_some_and(|lock| lock.exclusive.is_some())
    }
}
