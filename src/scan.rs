use std::sync::Arc;

use crate::{
    buffer_pool::{BufferPool, PageRef, Permissions},
    HeapFile, PageId, Result, StorageError, TransactionId, Tuple, TupleDesc,
};

/// The pull contract upstream operators consume tuples through.
///
/// `open` must be called before `has_next`/`next`. `rewind` restarts from the
/// beginning. Errors from the buffer pool (including aborts) surface from
/// `open`, `has_next` and `rewind`.
pub trait DbIterator {
    fn open(&mut self) -> Result<()>;

    fn has_next(&mut self) -> Result<bool>;

    /// The tuple `has_next` found. Call only after `has_next` returned true; a
    /// heap scan fails with [`StorageError::NoSuchElement`] otherwise.
    fn next(&mut self) -> Result<Tuple>;

    fn rewind(&mut self) -> Result<()>;

    fn close(&mut self);

    fn desc(&self) -> &Arc<TupleDesc>;

    /// Adapt an opened iterator into a std [`Iterator`]
    fn tuples(&mut self) -> Tuples<'_, Self>
    where
        Self: Sized,
    {
        Tuples {
            inner: self,
            done: false,
        }
    }
}

pub struct Tuples<'a, I> {
    inner: &'a mut I,
    done: bool,
}

impl<I: DbIterator> Iterator for Tuples<'_, I> {
    type Item = Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.inner.has_next() {
            Ok(true) => Some(DbIterator::next(self.inner)),
            Ok(false) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

enum ScanState {
    Unopened,
    Open {
        next_page: usize,
        current: Option<(PageRef, usize)>,
        //  set by a true `has_next`, consumed by `next`
        ready: bool,
    },
    Closed,
}

/// Sequential scan over a heap file, walking pages `0..page_count` through the buffer
/// pool under shared permission.
///
/// Pages are fetched lazily. Closing the scan drops its cursor but not the locks it
/// took; those belong to the transaction.
pub struct HeapScan<'a> {
    file: &'a HeapFile,
    pool: &'a BufferPool,
    txn: TransactionId,
    state: ScanState,
}

impl<'a> HeapScan<'a> {
    pub(crate) fn new(file: &'a HeapFile, pool: &'a BufferPool, txn: TransactionId) -> Self {
        Self {
            file,
            pool,
            txn,
            state: ScanState::Unopened,
        }
    }

    fn fetch(&self, page_number: usize) -> Result<PageRef> {
        self.pool.get_page(
            self.txn,
            PageId::new(self.file.id(), page_number),
            Permissions::ReadOnly,
        )
    }
}

impl DbIterator for HeapScan<'_> {
    fn open(&mut self) -> Result<()> {
        let current = if self.file.page_count()? > 0 {
            Some((self.fetch(0)?, 0))
        } else {
            None
        };
        self.state = ScanState::Open {
            next_page: 1,
            current,
            ready: false,
        };
        Ok(())
    }

    fn has_next(&mut self) -> Result<bool> {
        loop {
            let ScanState::Open {
                next_page,
                current,
                ready,
            } = &mut self.state
            else {
                return Ok(false);
            };
            if let Some((page, slot)) = current {
                if let Some((found, _)) = page.read().next_occupied(*slot) {
                    *slot = found;
                    *ready = true;
                    return Ok(true);
                }
            }
            if *next_page >= self.file.page_count()? {
                return Ok(false);
            }
            //  let go of the finished page so the pool may evict it for the next one
            *current = None;
            let page_id = PageId::new(self.file.id(), *next_page);
            *next_page += 1;
            let page = self
                .pool
                .get_page(self.txn, page_id, Permissions::ReadOnly)?;
            *current = Some((page, 0));
        }
    }

    fn next(&mut self) -> Result<Tuple> {
        let ScanState::Open {
            current: Some((page, slot)),
            ready: ready @ true,
            ..
        } = &mut self.state
        else {
            return Err(StorageError::NoSuchElement);
        };
        *ready = false;
        let guard = page.read();
        let tuple = guard.tuple(*slot).ok_or(StorageError::NoSuchElement)?;
        *slot += 1;
        Ok(tuple.clone())
    }

    fn rewind(&mut self) -> Result<()> {
        self.close();
        self.open()
    }

    fn close(&mut self) {
        self.state = ScanState::Closed;
    }

    fn desc(&self) -> &Arc<TupleDesc> {
        self.file.desc()
    }
}

/// An iterator over tuples already in memory, such as aggregate results
pub struct TupleIterator {
    desc: Arc<TupleDesc>,
    tuples: Vec<Tuple>,
    position: Option<usize>,
}

impl TupleIterator {
    pub fn new(desc: Arc<TupleDesc>, tuples: Vec<Tuple>) -> Self {
        Self {
            desc,
            tuples,
            position: None,
        }
    }
}

impl DbIterator for TupleIterator {
    fn open(&mut self) -> Result<()> {
        self.position = Some(0);
        Ok(())
    }

    fn has_next(&mut self) -> Result<bool> {
        Ok(self.position.is_some_and(|position| position < self.tuples.len()))
    }

    fn next(&mut self) -> Result<Tuple> {
        let position = self.position.ok_or(StorageError::NoSuchElement)?;
        let tuple = self
            .tuples
            .get(position)
            .cloned()
            .ok_or(StorageError::NoSuchElement)?;
        self.position = Some(position + 1);
        Ok(tuple)
    }

    fn rewind(&mut self) -> Result<()> {
        self.close();
        self.open()
    }

    fn close(&mut self) {
        self.position = None;
    }

    fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }
}
