//! Bounded worker pools with pluggable admission control.
//!
//! The phonemization scheduler runs each corpus partition on a local thread
//! pool whose width comes from a [`SizingPolicy`]. The default policy adapts
//! to live memory pressure: a machine with headroom runs wide, a loaded one
//! halves the pool instead of racing the OOM killer through a large corpus.
//!
//! Policies are consulted once per batch of tasks, at scheduling time, and
//! are advisory — they shrink concurrency proactively but never block or
//! queue work waiting for memory to free up.

use anyhow::{Context, Result};
use rayon::prelude::*;
use sysinfo::System;
use tracing::{debug, warn};

/// Decides how many workers a batch of independent tasks gets.
pub trait SizingPolicy: Send + Sync {
    fn workers(&self, task_count: usize) -> usize;
}

/// `max(1, min(cpus - 1, tasks / 10))`, halved under memory pressure.
///
/// The `tasks / 10` term keeps small partitions single-threaded where pool
/// spin-up would cost more than it buys; the halving kicks in when live
/// memory utilization is above `memory_threshold` percent at scheduling
/// time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryAdaptivePolicy {
    /// Utilization percentage (0–100) above which the pool is halved.
    pub memory_threshold: f32,
}

impl Default for MemoryAdaptivePolicy {
    fn default() -> Self {
        Self {
            memory_threshold: 75.0,
        }
    }
}

impl SizingPolicy for MemoryAdaptivePolicy {
    fn workers(&self, task_count: usize) -> usize {
        let cpus = num_cpus::get();
        let base = base_workers(cpus, task_count);
        let utilization = memory_utilization();
        let workers = if utilization > self.memory_threshold {
            let halved = (base / 2).max(1);
            warn!(
                "memory utilization {utilization:.1}% above {:.1}%: pool {base} -> {halved}",
                self.memory_threshold
            );
            halved
        } else {
            base
        };
        debug!("sized pool: {task_count} task(s), {cpus} cpu(s) -> {workers} worker(s)");
        workers
    }
}

/// Pure arithmetic part of [`MemoryAdaptivePolicy`].
fn base_workers(cpus: usize, task_count: usize) -> usize {
    cpus.saturating_sub(1).min(task_count / 10).max(1)
}

/// System-wide memory utilization in percent. A platform that reports no
/// memory stats reads as 0 (no throttling) rather than stalling the run.
fn memory_utilization() -> f32 {
    let mut sys = System::new();
    sys.refresh_memory();
    let total = sys.total_memory();
    if total == 0 {
        return 0.0;
    }
    let used = total.saturating_sub(sys.available_memory());
    used as f32 / total as f32 * 100.0
}

/// Pins the pool to an exact width. Test double and manual override.
#[derive(Debug, Clone, Copy)]
pub struct FixedPolicy(pub usize);

impl SizingPolicy for FixedPolicy {
    fn workers(&self, _task_count: usize) -> usize {
        self.0.max(1)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Worker pool
// ─────────────────────────────────────────────────────────────────────────────

/// A dedicated thread pool running one batch of independent tasks.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .build()
            .context("Cannot build worker thread pool")?;
        Ok(Self { pool })
    }

    pub fn sized_by(policy: &dyn SizingPolicy, task_count: usize) -> Result<Self> {
        Self::new(policy.workers(task_count))
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `work` over every task in parallel, collecting results in task
    /// order. Tasks are independent: one signals failure through its return
    /// value and the rest keep going.
    pub fn run<T, R, F>(&self, tasks: Vec<T>, work: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Send + Sync,
    {
        self.pool.install(|| tasks.into_par_iter().map(work).collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
