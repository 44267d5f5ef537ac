//! Fixed-width worker pool for upload tasks.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};

/// Runs futures on the runtime with at most `width` of them in flight.
///
/// Work is admitted in submission order and submission waits while the pool
/// is full. Dropping the pool's `run` future aborts every task it started.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    width: usize,
}

impl WorkerPool {
    pub fn new(width: usize) -> Self {
        Self {
            width: width.max(1),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Feeds every item through `work` and returns the outcomes in submission
    /// order. A task that panicked shows up as a `JoinError` in its slot.
    pub async fn run<T, F, Fut, R>(
        &self,
        items: impl IntoIterator<Item = T>,
        work: F,
    ) -> Vec<Result<R, JoinError>>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = R> + Send + 'static,
        R: Send + 'static,
    {
        let permits = Arc::new(Semaphore::new(self.width));
        let mut tasks = InFlight(Vec::new());

        for item in items {
            // The semaphore is owned here and never closed.
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            let job = work(item);
            tasks.0.push(tokio::spawn(async move {
                let output = job.await;
                drop(permit);
                output
            }));
        }

        let mut results = Vec::with_capacity(tasks.0.len());
        for handle in tasks.0.iter_mut() {
            results.push(handle.await);
        }
        results
    }
}

/// Aborts whatever is still running when dropped.
struct InFlight<R>(Vec<JoinHandle<R>>);

impl<R> Drop for InFlight<R> {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}
