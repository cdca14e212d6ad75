//! Minimal wall-clock timing used by the `heapdb-bench` binary.

use std::{
    fmt,
    time::{Duration, Instant},
};

pub struct BenchResult {
    pub operation: String,
    pub mean: Duration,
    pub median: Duration,
    pub p95: Duration,
    pub std_dev: Duration,
    pub iterations: usize,
    /// Work items (tuples, pages) one iteration processes
    pub items_per_iteration: usize,
}

impl BenchResult {
    /// Items per second at the mean iteration time
    pub fn throughput(&self) -> f64 {
        let secs = self.mean.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.items_per_iteration as f64 / secs
        }
    }
}

impl fmt::Display for BenchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:24} | {:>10.2?} | {:>10.2?} | {:>10.2?} | {:>10.2?} | {:>12.0} | {:>6}",
            self.operation,
            self.mean,
            self.median,
            self.p95,
            self.std_dev,
            self.throughput(),
            self.iterations
        )
    }
}

/// Time `iterations` runs of `operation` after one untimed warm-up run
pub fn benchmark<F>(name: &str, iterations: usize, items_per_iteration: usize, mut operation: F) -> BenchResult
where
    F: FnMut(),
{
    let iterations = iterations.max(1);
    let mut durations = Vec::with_capacity(iterations);

    operation();
    for _ in 0..iterations {
        let start = Instant::now();
        operation();
        durations.push(start.elapsed());
    }
    summarize(name, durations, items_per_iteration)
}

fn summarize(name: &str, mut durations: Vec<Duration>, items_per_iteration: usize) -> BenchResult {
    durations.sort();
    let iterations = durations.len();
    let mean = durations.iter().sum::<Duration>() / iterations as u32;
    let median = if iterations % 2 == 1 {
        durations[iterations / 2]
    } else {
        (durations[iterations / 2 - 1] + durations[iterations / 2]) / 2
    };
    let p95 = durations[((iterations * 95).div_ceil(100)).saturating_sub(1)];

    let variance: f64 = if iterations > 1 {
        durations
            .iter()
            .map(|d| (d.as_secs_f64() - mean.as_secs_f64()).powi(2))
            .sum::<f64>()
            / (iterations as f64 - 1.0)
    } else {
        0.0
    };

    BenchResult {
        operation: name.to_string(),
        mean,
        median,
        p95,
        std_dev: Duration::from_secs_f64(variance.sqrt()),
        iterations,
        items_per_iteration,
    }
}

pub fn print_header() {
    println!(
        "{:24} | {:>10} | {:>10} | {:>10} | {:>10} | {:>12} | {:>6}",
        "Operation", "Mean", "Median", "P95", "StdDev", "Items/sec", "Iters"
    );
    println!("{}", "-".repeat(100));
}
