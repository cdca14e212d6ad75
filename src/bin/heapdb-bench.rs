use std::{error::Error, path::PathBuf, sync::Arc, thread, time::Duration};

use clap::Parser;
use heapdb::{
    benchmark_framework::{benchmark, print_header},
    config::DEFAULT_PAGE_SIZE,
    Database, DbIterator, Field, FieldType, HeapFile, StorageConfig, Tuple, TupleDesc,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Insert/scan/delete workload against a single heap table
#[derive(Parser, Debug)]
#[command(name = "heapdb-bench")]
struct BenchArgs {
    /// Directory for the table file; wiped before and after the run
    #[arg(long, default_value = "./bench-data")]
    dir: PathBuf,

    /// Tuples inserted per iteration
    #[arg(long, default_value_t = 10_000)]
    tuples: usize,

    /// Tuples inserted per transaction
    #[arg(long, default_value_t = 500)]
    batch: usize,

    #[arg(long, default_value_t = 50)]
    pool_pages: usize,

    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: usize,

    /// Concurrent inserter threads
    #[arg(long, default_value_t = 4)]
    threads: usize,

    #[arg(long, default_value_t = 5)]
    iterations: usize,

    #[arg(long, default_value_t = 2_000)]
    lock_timeout_ms: u64,

    /// Attempts per transaction before an abort is reported as an error
    #[arg(long, default_value_t = 10)]
    max_attempts: usize,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

fn bench_desc() -> Arc<TupleDesc> {
    Arc::new(TupleDesc::with_names(
        &[FieldType::Int, FieldType::Int, FieldType::Str(32)],
        &["id", "age", "name"],
    ))
}

fn row(desc: &Arc<TupleDesc>, id: usize) -> heapdb::Result<Tuple> {
    Tuple::new(
        Arc::clone(desc),
        vec![
            Field::Int(id as i32),
            Field::Int(20 + (id % 50) as i32),
            Field::Str(format!("user{id}")),
        ],
    )
}

/// Insert ids `[start, end)` in transactions of `batch` tuples each
fn insert_range(
    db: &Database,
    table: &HeapFile,
    start: usize,
    end: usize,
    batch: usize,
    max_attempts: usize,
) -> heapdb::Result<()> {
    let pool = db.buffer_pool();
    let mut next = start;
    while next < end {
        let stop = (next + batch).min(end);
        db.run_transaction(max_attempts, |txn| {
            for id in next..stop {
                let mut tuple = row(table.desc(), id)?;
                table.insert_tuple(pool, txn, &mut tuple)?;
            }
            Ok(())
        })?;
        next = stop;
    }
    Ok(())
}

fn count_rows(db: &Database, table: &HeapFile, max_attempts: usize) -> heapdb::Result<usize> {
    db.run_transaction(max_attempts, |txn| {
        let mut scan = table.scan(db.buffer_pool(), txn);
        scan.open()?;
        let mut rows = 0;
        while scan.has_next()? {
            scan.next()?;
            rows += 1;
        }
        scan.close();
        Ok(rows)
    })
}

/// Delete every other surviving row in transactions of `batch` deletes each,
/// returning how many went
fn delete_alternate(
    db: &Database,
    table: &HeapFile,
    batch: usize,
    max_attempts: usize,
) -> heapdb::Result<usize> {
    let pool = db.buffer_pool();
    let victims: Vec<Tuple> = db.run_transaction(max_attempts, |txn| {
        let mut scan = table.scan(pool, txn);
        scan.open()?;
        scan.tuples().step_by(2).collect()
    })?;
    for chunk in victims.chunks(batch.max(1)) {
        db.run_transaction(max_attempts, |txn| {
            for tuple in chunk {
                table.delete_tuple(pool, txn, tuple)?;
            }
            Ok(())
        })?;
    }
    Ok(victims.len())
}

fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let args = BenchArgs::parse();

    if args.dir.exists() {
        std::fs::remove_dir_all(&args.dir)?;
    }
    std::fs::create_dir_all(&args.dir)?;

    let config = StorageConfig::default()
        .with_page_size(args.page_size)
        .with_pool_pages(args.pool_pages)
        .with_lock_timeout(Duration::from_millis(args.lock_timeout_ms));
    let db = Database::new(config)?;
    let table = db.open_table(args.dir.join("bench.dat"), bench_desc())?;
    info!(?args, "running benchmarks");

    print_header();
    let mut next_id = 0;
    let result = benchmark("insert (single thread)", args.iterations, args.tuples, || {
        insert_range(&db, &table, next_id, next_id + args.tuples, args.batch, args.max_attempts)
            .unwrap_or_else(|e| panic!("insert failed: {e}"));
        next_id += args.tuples;
    });
    println!("{result}");

    let threads = args.threads.max(1);
    let per_thread = args.tuples / threads;
    let result = benchmark("insert (concurrent)", args.iterations, per_thread * threads, || {
        let base = next_id;
        thread::scope(|scope| {
            for worker in 0..threads {
                let (db, table) = (&db, &table);
                let start = base + worker * per_thread;
                scope.spawn(move || {
                    insert_range(db, table, start, start + per_thread, args.batch, args.max_attempts)
                        .unwrap_or_else(|e| panic!("worker {worker} insert failed: {e}"));
                });
            }
        });
        next_id += per_thread * threads;
    });
    println!("{result}");

    let rows = count_rows(&db, &table, args.max_attempts)?;
    let result = benchmark("full scan", args.iterations, rows, || {
        count_rows(&db, &table, args.max_attempts).unwrap_or_else(|e| panic!("scan failed: {e}"));
    });
    println!("{result}");

    let mut deleted = 0;
    let result = benchmark("delete alternate rows", args.iterations, rows / 2, || {
        deleted += delete_alternate(&db, &table, args.batch, args.max_attempts)
            .unwrap_or_else(|e| panic!("delete failed: {e}"));
    });
    println!("{result}");

    let stats = db.buffer_pool().stats();
    let (hits, misses) = stats.get();
    println!();
    println!(
        "rows: {} inserted, {} deleted, {} remaining over {} pages",
        next_id,
        deleted,
        count_rows(&db, &table, args.max_attempts)?,
        table.page_count()?
    );
    println!(
        "buffer pool: {hits} hits, {misses} misses, {} evictions, {:.1}% hit rate",
        stats.evictions.load(std::sync::atomic::Ordering::Relaxed),
        stats.hit_rate()
    );

    std::fs::remove_dir_all(&args.dir)?;
    Ok(())
}
