use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    buffer_pool::{BufferPool, PageRef, Permissions},
    page::slot_capacity,
    HeapPage, HeapScan, PageId, Result, StorageError, TableId, TransactionId, Tuple, TupleDesc,
};

/// A table stored as an unordered collection of fixed-size pages in one file.
///
/// Page `i` lives at bytes `[i * page_size, (i + 1) * page_size)`. There is no file
/// header; the page count is derived from the file length. Pages are only ever
/// appended, so a page number is never reused.
#[derive(Debug)]
pub struct HeapFile {
    path: PathBuf,
    id: TableId,
    desc: Arc<TupleDesc>,
    page_size: usize,
    file: Mutex<File>,
    //  serializes growth so two inserters never allocate the same page number
    grow_lock: Mutex<()>,
}

impl HeapFile {
    /// Open (creating if needed) the table file at `path`
    pub fn open<P: AsRef<Path>>(path: P, desc: Arc<TupleDesc>, page_size: usize) -> Result<Self> {
        if desc.is_empty() {
            return Err(StorageError::InvalidLayout("a table needs at least one field".into()));
        }
        if slot_capacity(page_size, desc.byte_width()) == 0 {
            return Err(StorageError::InvalidLayout(format!(
                "{}-byte tuples do not fit on a {page_size}-byte page",
                desc.byte_width()
            )));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;
        let path = path.as_ref().canonicalize()?;
        let id = Self::table_id_for(&path);

        let len = file.metadata()?.len();
        if len % page_size as u64 != 0 {
            warn!(
                path = %path.display(),
                len,
                page_size,
                "table file length is not a multiple of the page size"
            );
        }
        info!(path = %path.display(), table_id = id, layout = %desc, "opened heap file");

        Ok(Self {
            path,
            id,
            desc,
            page_size,
            file: Mutex::new(file),
            grow_lock: Mutex::new(()),
        })
    }

    /// The same canonical path always hashes to the same id, across process runs
    fn table_id_for(canonical_path: &Path) -> TableId {
        crc32fast::hash(canonical_path.to_string_lossy().as_bytes())
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of pages in the file, rounding a trailing partial page up
    pub fn page_count(&self) -> Result<usize> {
        let len = self.file.lock().metadata()?.len() as usize;
        Ok(len.div_ceil(self.page_size))
    }

    fn check_table(&self, page_id: PageId) -> Result<()> {
        if page_id.table_id != self.id {
            return Err(StorageError::UnknownTable(page_id.table_id));
        }
        Ok(())
    }

    /// Read exactly one page from disk. A short read means corruption or a page
    /// number past the end of the file.
    pub fn read_page(&self, page_id: PageId) -> Result<HeapPage> {
        self.check_table(page_id)?;
        let mut data = vec![0; self.page_size];
        let mut filled = 0;
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start((page_id.page_number * self.page_size) as u64))?;
            while filled < data.len() {
                match file.read(&mut data[filled..]) {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                }
            }
        }
        if filled != self.page_size {
            return Err(StorageError::ShortRead {
                page_id,
                expected: self.page_size,
                actual: filled,
            });
        }
        HeapPage::read(page_id, Arc::clone(&self.desc), &data, self.page_size)
    }

    /// Overwrite the page's region of the file. The page must already exist;
    /// growth only happens through [`HeapFile::insert_tuple`].
    pub fn write_page(&self, page: &HeapPage) -> Result<()> {
        let page_id = page.id();
        self.check_table(page_id)?;
        let data = page.write()?;
        let mut file = self.file.lock();
        let page_count = (file.metadata()?.len() as usize).div_ceil(self.page_size);
        if page_id.page_number >= page_count {
            return Err(StorageError::PageOutOfRange {
                page_id,
                page_count,
            });
        }
        self.write_region(&mut file, page_id, &data)
    }

    fn write_region(&self, file: &mut File, page_id: PageId, data: &[u8]) -> Result<()> {
        if data.len() != self.page_size {
            return Err(StorageError::CorruptPage {
                page_id,
                detail: format!("page image is {} bytes, file pages are {}", data.len(), self.page_size),
            });
        }
        file.seek(SeekFrom::Start((page_id.page_number * self.page_size) as u64))?;
        file.write_all(data).map_err(|e| match e.kind() {
            io::ErrorKind::WriteZero => StorageError::ShortWrite { page_id },
            _ => StorageError::Io(e),
        })
    }

    /// Append an empty page to the file and return its id
    pub(crate) fn allocate_page(&self) -> Result<PageId> {
        let _grow = self.grow_lock.lock();
        let mut file = self.file.lock();
        let page_number = (file.metadata()?.len() as usize).div_ceil(self.page_size);
        let page_id = PageId::new(self.id, page_number);
        self.write_region(&mut file, page_id, &HeapPage::empty_page_data(self.page_size))?;
        debug!(%page_id, "grew heap file");
        Ok(page_id)
    }

    /// Add `tuple` to the first page with a free slot, growing the file if every
    /// page is full. Stamps the tuple's record id and returns the dirtied page.
    pub fn insert_tuple(
        &self,
        pool: &BufferPool,
        txn: TransactionId,
        tuple: &mut Tuple,
    ) -> Result<PageRef> {
        if !tuple.desc().same_layout(&self.desc) {
            return Err(StorageError::SchemaMismatch(format!(
                "tuple ({}) for table {} ({})",
                tuple.desc(),
                self.id,
                self.desc
            )));
        }

        for page_number in 0..self.page_count()? {
            let page = pool.get_page(txn, PageId::new(self.id, page_number), Permissions::ReadWrite)?;
            let mut guard = page.write();
            if guard.empty_slot_count() == 0 {
                continue;
            }
            guard.insert_tuple(txn, tuple)?;
            drop(guard);
            return Ok(page);
        }

        loop {
            let page_id = self.allocate_page()?;
            let page = pool.get_page(txn, page_id, Permissions::ReadWrite)?;
            let mut guard = page.write();
            match guard.insert_tuple(txn, tuple) {
                Ok(()) => {
                    drop(guard);
                    return Ok(page);
                }
                //  another inserter filled the new page first
                Err(StorageError::PageFull(_)) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Remove the tuple named by its own record id and return the dirtied page
    pub fn delete_tuple(
        &self,
        pool: &BufferPool,
        txn: TransactionId,
        tuple: &Tuple,
    ) -> Result<PageRef> {
        let record_id = tuple.record_id().ok_or(StorageError::MissingRecordId)?;
        if record_id.page_id.table_id != self.id {
            return Err(StorageError::TupleNotOnThisPage(record_id.page_id));
        }
        let page = pool.get_page(txn, record_id.page_id, Permissions::ReadWrite)?;
        page.write().delete_tuple(txn, tuple)?;
        Ok(page)
    }

    /// A sequential scan over every tuple of the table on behalf of `txn`
    pub fn scan<'a>(&'a self, pool: &'a BufferPool, txn: TransactionId) -> HeapScan<'a> {
        HeapScan::new(self, pool, txn)
    }
}
