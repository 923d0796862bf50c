use crate::error::{Result, SimError};
use rayon::{ThreadPool, ThreadPoolBuilder, prelude::*};

/// A fixed set of worker threads shared by every phase of a run.
///
/// Work inside a phase is statically partitioned by index range: a slice of
/// `n` items is cut into `workers` contiguous chunks. The fork-join around
/// each phase is the barrier; nothing from the next phase starts until every
/// chunk of the current one has returned. With one worker there is no
/// thread pool at all and phases run inline on the caller.
pub struct WorkerPool {
    workers: usize,
    pool: Option<ThreadPool>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers)
            .finish()
    }
}

impl WorkerPool {
    pub fn new(workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(SimError::InvalidConfig(
                "worker count must be at least 1".into(),
            ));
        }

        let pool = if workers > 1 {
            Some(
                ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .thread_name(|i| format!("bh-worker-{i}"))
                    .build()?,
            )
        } else {
            None
        };

        Ok(Self { workers, pool })
    }

    pub fn sequential() -> Self {
        Self {
            workers: 1,
            pool: None,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn is_parallel(&self) -> bool {
        self.pool.is_some()
    }

    /// Length of the contiguous range each worker owns.
    pub fn chunk_len(&self, len: usize) -> usize {
        len.div_ceil(self.workers).max(1)
    }

    /// Runs `op` inside the pool (or inline when sequential).
    pub fn install<R, OP>(&self, op: OP) -> R
    where
        R: Send,
        OP: FnOnce() -> R + Send,
    {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }

    /// Hands each worker its contiguous slice of `items` along with the
    /// slice's offset, and sums the counts the workers return.
    /// Returns only after every worker has finished.
    pub fn for_each_slice<T, OP>(&self, items: &mut [T], op: OP) -> u64
    where
        T: Send,
        OP: Fn(usize, &mut [T]) -> u64 + Sync + Send,
    {
        match &self.pool {
            None => op(0, items),
            Some(pool) => {
                let chunk = self.chunk_len(items.len());
                pool.install(|| {
                    items
                        .par_chunks_mut(chunk)
                        .enumerate()
                        .map(|(k, slice)| op(k * chunk, slice))
                        .sum()
                })
            }
        }
    }
}
