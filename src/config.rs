use std::time::Duration;

use crate::{Result, StorageError};

// Compile-time default page size, selected via Cargo features.
// Exactly one of `page-4k`, `page-8k`, or `page-1m` should be enabled.
#[cfg(feature = "page-4k")]
pub const DEFAULT_PAGE_SIZE: usize = 4096;
#[cfg(feature = "page-8k")]
pub const DEFAULT_PAGE_SIZE: usize = 8192;
#[cfg(feature = "page-1m")]
pub const DEFAULT_PAGE_SIZE: usize = 1024 * 1024;

#[cfg(not(any(feature = "page-4k", feature = "page-8k", feature = "page-1m")))]
compile_error!(
    "One of `page-4k`, `page-8k`, or `page-1m` features must be enabled to select a page size."
);

#[cfg(any(
    all(feature = "page-4k", feature = "page-8k"),
    all(feature = "page-4k", feature = "page-1m"),
    all(feature = "page-8k", feature = "page-1m"),
))]
compile_error!("Enable only one page size feature (page-4k, page-8k, or page-1m)");

/// Number of pages the buffer pool caches unless told otherwise
pub const DEFAULT_POOL_PAGES: usize = 50;

/// How long a transaction waits on a page lock before it is aborted
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Knobs shared by every component that touches pages.
///
/// The page size is global: every table opened through the same
/// [`crate::Database`] uses it, and table files are only readable with the
/// page size they were written with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub page_size: usize,
    pub pool_pages: usize,
    pub lock_timeout: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            pool_pages: DEFAULT_POOL_PAGES,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

impl StorageConfig {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_pool_pages(mut self, pool_pages: usize) -> Self {
        self.pool_pages = pool_pages;
        self
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(StorageError::InvalidConfig("page size must be non-zero".into()));
        }
        if self.pool_pages == 0 {
            return Err(StorageError::InvalidConfig(
                "buffer pool needs at least one page".into(),
            ));
        }
        if self.lock_timeout.is_zero() {
            return Err(StorageError::InvalidConfig(
                "lock timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
