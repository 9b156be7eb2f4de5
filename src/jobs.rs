use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;

use rayon::prelude::*;

use crate::error::{Error, Result};

/// Shared stop flag, polled by workers between images.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Progress messages of a background run.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// Images processed so far across all partitions.
    Progress { processed: usize, total: usize },
    /// One partition finished; `matches` is how many of its targets had
    /// at least one match.
    PartitionFinished { partition: usize, matches: usize },
    Completed { groups: usize },
    Cancelled,
    Failed(String),
}

/// Run-wide processed counter, shared by reference between workers.
#[derive(Debug)]
pub struct ProgressReporter {
    processed: AtomicUsize,
    total: usize,
    events: Option<mpsc::Sender<JobEvent>>,
}

impl ProgressReporter {
    pub fn new(total: usize, events: Option<mpsc::Sender<JobEvent>>) -> Self {
        ProgressReporter {
            processed: AtomicUsize::new(0),
            total,
            events,
        }
    }

    /// Count one processed image and publish the new total.
    pub fn tick(&self) -> usize {
        let processed = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        self.send(JobEvent::Progress {
            processed,
            total: self.total,
        });
        processed
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.processed() as f64 * 100.0 / self.total as f64
    }

    /// A dropped receiver is not an error; the run just goes unobserved.
    pub fn send(&self, event: JobEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

pub trait JobScheduler {
    /// How many tasks can usefully run at once.
    fn parallelism(&self) -> usize;

    /// Run every task to completion. Outputs come back in task order.
    fn run_partitioned<T, F>(&self, tasks: Vec<F>) -> Vec<T>
    where
        F: FnOnce() -> T + Send,
        T: Send;
}

/// Dedicated rayon pool, so scans do not compete with the global pool.
pub struct ThreadPoolScheduler {
    pool: rayon::ThreadPool,
}

impl ThreadPoolScheduler {
    /// `None` sizes the pool from the available CPU parallelism.
    pub fn new(threads: Option<usize>) -> Result<Self> {
        let threads = threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("lookalike-scan-{i}"))
            .build()
            .map_err(|e| Error::JobFailed(e.to_string()))?;
        Ok(ThreadPoolScheduler { pool })
    }
}

impl JobScheduler for ThreadPoolScheduler {
    fn parallelism(&self) -> usize {
        self.pool.current_num_threads()
    }

    fn run_partitioned<T, F>(&self, tasks: Vec<F>) -> Vec<T>
    where
        F: FnOnce() -> T + Send,
        T: Send,
    {
        self.pool
            .install(|| tasks.into_par_iter().map(|task| task()).collect())
    }
}

/// Runs tasks one after another on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineScheduler;

impl JobScheduler for InlineScheduler {
    fn parallelism(&self) -> usize {
        1
    }

    fn run_partitioned<T, F>(&self, tasks: Vec<F>) -> Vec<T>
    where
        F: FnOnce() -> T + Send,
        T: Send,
    {
        tasks.into_iter().map(|task| task()).collect()
    }
}

/// Split into `parts` contiguous slices whose lengths differ by at most one.
pub fn split_even<T>(items: &[T], parts: usize) -> Vec<&[T]> {
    let parts = parts.max(1);
    let base = items.len() / parts;
    let extra = items.len() % parts;

    let mut slices = Vec::with_capacity(parts);
    let mut rest = items;
    for i in 0..parts {
        let (head, tail) = rest.split_at(base + usize::from(i < extra));
        slices.push(head);
        rest = tail;
    }
    slices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_even_keeps_order_and_balance() {
        let items: Vec<u32> = (0..10).collect();
        let parts = split_even(&items, 3);
        assert_eq!(parts.iter().map(|p| p.len()).collect::<Vec<_>>(), vec![4, 3, 3]);
        assert_eq!(parts.concat(), items);

        assert_eq!(split_even(&items, 0).len(), 1);
        assert_eq!(split_even(&items[..2], 4).iter().filter(|p| p.is_empty()).count(), 2);
    }

    #[test]
    fn schedulers_return_outputs_in_task_order() {
        let shared: Vec<u64> = (1..=100).collect();
        let make_tasks = || {
            split_even(&shared, 7)
                .into_iter()
                .map(|chunk| move || chunk.iter().sum::<u64>())
                .collect::<Vec<_>>()
        };

        let inline = InlineScheduler.run_partitioned(make_tasks());
        let pool = ThreadPoolScheduler::new(Some(4)).unwrap();
        assert_eq!(pool.parallelism(), 4);
        let parallel = pool.run_partitioned(make_tasks());

        assert_eq!(inline, parallel);
        assert_eq!(parallel.iter().sum::<u64>(), 5050);
    }

    #[test]
    fn progress_is_counted_across_threads() {
        let (tx, rx) = mpsc::channel();
        let progress = ProgressReporter::new(40, Some(tx));
        let pool = ThreadPoolScheduler::new(Some(4)).unwrap();
        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let progress = &progress;
                move || {
                    for _ in 0..10 {
                        progress.tick();
                    }
                }
            })
            .collect();
        pool.run_partitioned(tasks);

        assert_eq!(progress.processed(), 40);
        assert_eq!(progress.percent(), 100.0);
        drop(progress);

        let mut seen: Vec<usize> = rx
            .iter()
            .filter_map(|event| match event {
                JobEvent::Progress { processed, total: 40 } => Some(processed),
                _ => None,
            })
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (1..=40).collect::<Vec<_>>());
    }

    #[test]
    fn cancel_token_is_shared_by_clones() {
        let token = CancelToken::new();
        let worker_copy = token.clone();
        assert!(!worker_copy.is_cancelled());
        token.cancel();
        assert!(worker_copy.is_cancelled());
    }
}
