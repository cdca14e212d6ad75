//! Clock (second-chance) replacement.
//!
//! Cached pages sit in a ring of slots with a reference bit each. Fetching a
//! page sets its bit. The hand sweeps the ring: unevictable pages are passed
//! over untouched, a set bit is cleared and passed over, and the first
//! evictable page with a clear bit is the victim.

use std::collections::HashMap;

use crate::PageId;

#[derive(Debug)]
struct ClockSlot {
    page_id: PageId,
    referenced: bool,
}

#[derive(Debug, Default)]
pub(crate) struct PolicyState {
    ring: Vec<Option<ClockSlot>>,
    positions: HashMap<PageId, usize>,
    free: Vec<usize>,
    hand: usize,
}

impl PolicyState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on_insert(&mut self, page_id: PageId) {
        if let Some(&idx) = self.positions.get(&page_id) {
            if let Some(slot) = self.ring[idx].as_mut() {
                slot.referenced = true;
            }
            return;
        }
        let slot = Some(ClockSlot {
            page_id,
            referenced: true,
        });
        let idx = match self.free.pop() {
            Some(idx) => {
                self.ring[idx] = slot;
                idx
            }
            None => {
                self.ring.push(slot);
                self.ring.len() - 1
            }
        };
        self.positions.insert(page_id, idx);
    }

    pub(crate) fn record_access(&mut self, page_id: PageId) {
        if let Some(&idx) = self.positions.get(&page_id) {
            if let Some(slot) = self.ring[idx].as_mut() {
                slot.referenced = true;
            }
        }
    }

    pub(crate) fn remove(&mut self, page_id: PageId) {
        if let Some(idx) = self.positions.remove(&page_id) {
            self.ring[idx] = None;
            self.free.push(idx);
        }
    }

    pub(crate) fn victim(&mut self, mut evictable: impl FnMut(PageId) -> bool) -> Option<PageId> {
        let len = self.ring.len();
        if len == 0 {
            return None;
        }
        //  two sweeps: the first may only clear reference bits
        for _ in 0..2 * len {
            let idx = self.hand;
            self.hand = (self.hand + 1) % len;
            let Some(slot) = self.ring[idx].as_mut() else {
                continue;
            };
            if !evictable(slot.page_id) {
                continue;
            }
            if slot.referenced {
                slot.referenced = false;
                continue;
            }
            return Some(slot.page_id);
        }
        None
    }
}
