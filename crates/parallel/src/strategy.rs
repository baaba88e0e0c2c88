//! Parallel processing strategies

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use std::ops::Range;

/// Processing mode for algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessingMode {
    /// Single-threaded processing
    Sequential,
    /// Parallel processing using all available cores
    #[default]
    Parallel,
    /// Parallel with specified number of threads
    ParallelWith(usize),
}

impl ProcessingMode {
    /// Mode for a `--threads N` / `--sequential` style pair of options
    pub fn from_threads(threads: Option<usize>, sequential: bool) -> Self {
        match (sequential, threads) {
            (true, _) | (false, Some(1)) => ProcessingMode::Sequential,
            (false, Some(0)) | (false, None) => ProcessingMode::Parallel,
            (false, Some(n)) => ProcessingMode::ParallelWith(n),
        }
    }
}

/// Strategy for parallel execution
pub trait ParallelStrategy {
    /// Map a function over indices and collect results in index order
    fn par_map<T, F>(&self, range: Range<usize>, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send;

    /// Like `par_map`, stopping at the first error
    fn try_par_map<T, E, F>(&self, range: Range<usize>, f: F) -> Result<Vec<T>, E>
    where
        T: Send,
        E: Send,
        F: Fn(usize) -> Result<T, E> + Sync + Send;
}

/// Run `op` inside a dedicated pool, or the global one if it cannot be built
#[cfg(feature = "parallel")]
fn with_pool<R, OP>(threads: usize, op: OP) -> R
where
    R: Send,
    OP: FnOnce() -> R + Send,
{
    match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
        Ok(pool) => pool.install(op),
        Err(e) => {
            tracing::warn!("cannot build a {}-thread pool ({}), using the global pool", threads, e);
            op()
        }
    }
}

#[cfg(feature = "parallel")]
impl ParallelStrategy for ProcessingMode {
    fn par_map<T, F>(&self, range: Range<usize>, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send,
    {
        match self {
            ProcessingMode::Sequential => range.map(f).collect(),
            ProcessingMode::Parallel => range.into_par_iter().map(f).collect(),
            ProcessingMode::ParallelWith(threads) => {
                with_pool(*threads, || range.into_par_iter().map(f).collect())
            }
        }
    }

    fn try_par_map<T, E, F>(&self, range: Range<usize>, f: F) -> Result<Vec<T>, E>
    where
        T: Send,
        E: Send,
        F: Fn(usize) -> Result<T, E> + Sync + Send,
    {
        match self {
            ProcessingMode::Sequential => range.map(f).collect(),
            ProcessingMode::Parallel => range.into_par_iter().map(f).collect(),
            ProcessingMode::ParallelWith(threads) => {
                with_pool(*threads, || range.into_par_iter().map(f).collect())
            }
        }
    }
}

/// Without the `parallel` feature every mode runs on the calling thread
#[cfg(not(feature = "parallel"))]
impl ParallelStrategy for ProcessingMode {
    fn par_map<T, F>(&self, range: Range<usize>, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send,
    {
        range.map(f).collect()
    }

    fn try_par_map<T, E, F>(&self, range: Range<usize>, f: F) -> Result<Vec<T>, E>
    where
        T: Send,
        E: Send,
        F: Fn(usize) -> Result<T, E> + Sync + Send,
    {
        range.map(f).collect()
    }
}
