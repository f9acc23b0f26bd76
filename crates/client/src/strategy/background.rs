//! Tracking for work that outlives the request that started it.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinSet;

/// Background write-through and eviction tasks.
///
/// Responses never wait on these; `drain` exists for shutdown and tests.
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    set: Arc<Mutex<JoinSet<()>>>,
}

impl BackgroundTasks {
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut set = self.set.lock().unwrap_or_else(PoisonError::into_inner);
        while set.try_join_next().is_some() {}
        set.spawn(task);
    }

    /// Number of tasks not yet reaped.
    pub fn pending(&self) -> usize {
        self.set.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Wait until every task, including ones spawned while draining, is done.
    pub async fn drain(&self) {
        loop {
            let mut set = std::mem::take(&mut *self.set.lock().unwrap_or_else(PoisonError::into_inner));
            if set.is_empty() {
                return;
            }
            while let Some(result) = set.join_next().await {
                if let Err(e) = result {
                    tracing::warn!("background cache task failed: {e}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_drain_waits_for_nested_spawns() {
        let tasks = BackgroundTasks::default();
        let done = Arc::new(AtomicUsize::new(0));

        let inner_tasks = tasks.clone();
        let inner_done = done.clone();
        tasks.spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let d = inner_done.clone();
            inner_tasks.spawn(async move {
                d.fetch_add(1, Ordering::SeqCst);
            });
            inner_done.fetch_add(1, Ordering::SeqCst);
        });

        tasks.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 2);
        assert_eq!(tasks.pending(), 0);
    }
}
