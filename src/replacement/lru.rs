//! LRU replacement over an insertion-ordered hash map.
//!
//! The front of the map is the least recently used page. A fetch moves the
//! page to the back; victim selection walks from the front and takes the first
//! page the pool says it may evict.

use hashlink::LinkedHashMap;

use crate::PageId;

#[derive(Debug, Default)]
pub(crate) struct PolicyState {
    recency: LinkedHashMap<PageId, ()>,
}

impl PolicyState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on_insert(&mut self, page_id: PageId) {
        self.recency.insert(page_id, ());
    }

    pub(crate) fn record_access(&mut self, page_id: PageId) {
        if self.recency.remove(&page_id).is_some() {
            self.recency.insert(page_id, ());
        }
    }

    pub(crate) fn remove(&mut self, page_id: PageId) {
        self.recency.remove(&page_id);
    }

    pub(crate) fn victim(&mut self, mut evictable: impl FnMut(PageId) -> bool) -> Option<PageId> {
        self.recency.keys().copied().find(|page_id| evictable(*page_id))
    }
}
