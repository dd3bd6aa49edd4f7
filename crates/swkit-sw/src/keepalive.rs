//! Keep-alive handle for work that outlives the event that started it.
//!
//! A handler may answer its caller before every piece of its work is done
//! (a response is returned while the copy destined for the store is still
//! being written). Such work is handed to [`KeepAlive::wait_until`]; the
//! worker is not torn down until [`KeepAlive::settle`] has seen it finish.

use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::task::JoinSet;
use tracing::{trace, warn};

/// Tracks pending background work of one worker.
#[derive(Debug, Clone, Default)]
pub struct KeepAlive {
    tasks: Arc<Mutex<JoinSet<()>>>,
}

impl KeepAlive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` in the background and keep the worker alive until it
    /// completes. Must be called from within a Tokio runtime.
    pub fn wait_until<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        reap(&mut tasks);
        tasks.spawn(work);
        trace!(pending = tasks.len(), "Extended worker lifetime");
    }

    /// Number of pieces of work still running.
    pub fn pending(&self) -> usize {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        reap(&mut tasks);
        tasks.len()
    }

    /// Wait until all work registered so far, and any work it registers in
    /// turn, has finished.
    pub async fn settle(&self) {
        loop {
            let mut batch = {
                let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
                std::mem::take(&mut *tasks)
            };
            if batch.is_empty() {
                return;
            }

            while let Some(result) = batch.join_next().await {
                if let Err(e) = result {
                    warn!(error = %e, "Background work did not complete");
                }
            }
        }
    }
}

/// Drop finished tasks so a long-lived worker does not accumulate them.
fn reap(tasks: &mut JoinSet<()>) {
    while let Some(result) = tasks.try_join_next() {
        if let Err(e) = result {
            warn!(error = %e, "Background work did not complete");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_settle_waits_for_work() {
        let keep_alive = KeepAlive::new();
        let done = Arc::new(AtomicUsize::new(0));

        for delay in [5, 15, 1] {
            let done = done.clone();
            keep_alive.wait_until(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        keep_alive.settle().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(keep_alive.pending(), 0);
    }

    #[tokio::test]
    async fn test_settle_covers_nested_work() {
        let keep_alive = KeepAlive::new();
        let done = Arc::new(AtomicUsize::new(0));

        let inner_keep_alive = keep_alive.clone();
        let inner_done = done.clone();
        keep_alive.wait_until(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            inner_keep_alive.wait_until(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                inner_done.fetch_add(1, Ordering::SeqCst);
            });
        });

        keep_alive.settle().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_settle_survives_panicking_work() {
        let keep_alive = KeepAlive::new();
        keep_alive.wait_until(async { panic!("store exploded") });
        keep_alive.settle().await;
        assert_eq!(keep_alive.pending(), 0);
    }

    #[tokio::test]
    async fn test_finished_work_is_reaped_without_settle() {
        let keep_alive = KeepAlive::new();
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..64 {
            let done = done.clone();
            keep_alive.wait_until(async move {
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        while done.load(Ordering::SeqCst) < 64 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        // The counter is bumped before the task's output is published.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(keep_alive.pending(), 0);

        keep_alive.wait_until(std::future::pending());
        assert_eq!(keep_alive.pending(), 1);
    }

    #[tokio::test]
    async fn test_settle_with_nothing_pending() {
        KeepAlive::new().settle().await;
    }
}
