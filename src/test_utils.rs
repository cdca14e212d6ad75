//! Helpers shared by unit tests, integration tests and benchmarks.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{Database, Field, FieldType, StorageConfig, Tuple, TupleDesc};

/// A scratch directory removed (with its contents) on drop
pub struct TestDir {
    path: PathBuf,
}

impl TestDir {
    pub fn new<P>(path: P) -> Self
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path).unwrap();
        Self { path }
    }
}

impl Drop for TestDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

impl AsRef<Path> for TestDir {
    fn as_ref(&self) -> &Path {
        self.path.as_ref()
    }
}

/// A path under the system temp dir that no other test will use
pub fn generate_filename() -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!(
        "heapdb_test_{}_{}_{}",
        std::process::id(),
        timestamp,
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ))
}

/// `n` unnamed INT columns
pub fn int_desc(n: usize) -> Arc<TupleDesc> {
    Arc::new(TupleDesc::from_types(&vec![FieldType::Int; n]))
}

pub fn int_tuple(desc: &Arc<TupleDesc>, values: &[i32]) -> Tuple {
    Tuple::new(
        Arc::clone(desc),
        values.iter().copied().map(Field::Int).collect(),
    )
    .unwrap()
}

/// A database instance plus the directory its tables should live in
pub fn test_db(page_size: usize, pool_pages: usize) -> (Database, TestDir) {
    let dir = TestDir::new(generate_filename());
    let config = StorageConfig::default()
        .with_page_size(page_size)
        .with_pool_pages(pool_pages);
    (Database::new(config).unwrap(), dir)
}
