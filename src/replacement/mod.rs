//! Victim selection for the buffer pool.
//!
//! Exactly one policy is compiled in, chosen by Cargo feature:
//!
//! - **LRU** (`replacement_lru`, default): evicts the least recently fetched page.
//! - **Clock** (`replacement_clock`): second-chance sweep over reference bits.
//!
//! Both expose a `PolicyState` with the same surface. The pool calls it while
//! holding its own mutex, so policies keep no locks of their own:
//! - `on_insert()`: a page entered the cache
//! - `record_access()`: a cached page was fetched again
//! - `remove()`: a page left the cache
//! - `victim()`: the preferred page among those the caller deems evictable

#[cfg(all(feature = "replacement_lru", feature = "replacement_clock"))]
compile_error!("Enable only one buffer replacement policy feature (LRU or Clock)");

#[cfg(not(any(feature = "replacement_lru", feature = "replacement_clock")))]
compile_error!("At least one buffer replacement policy feature must be enabled");

#[cfg(feature = "replacement_lru")]
mod lru;
#[cfg(feature = "replacement_lru")]
pub(crate) use lru::PolicyState;

#[cfg(feature = "replacement_clock")]
mod clock;
#[cfg(feature = "replacement_clock")]
pub(crate) use clock::PolicyState;
