use std::future::Future;

use futures::future::BoxFuture;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::debug;

/// A shutdown signal is a future that resolve to unit.
pub type ShutdownSignal = BoxFuture<'static, ()>;

/// Shutdown can be used to signal shutdown across many different tasks.
/// Shutdown is cheaply clonable so it can be shared with as many tasks as needed.
#[derive(Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(1);
        Self { tx }
    }
    /// Signal that all listeners should shutdown.
    /// Shutdown can be called from any clone.
    pub fn shutdown(&self) {
        let _ = self.tx.send(());
    }
    /// Construct a future that resolves when the shutdown signal is sent.
    ///
    /// The future is cancel safe.
    pub fn wait_fut(&self) -> ShutdownSignal {
        let mut sub = self.tx.subscribe();
        Box::pin(async move {
            let _ = sub.recv().await;
        })
    }
    /// Spawn a task that is raced against the shutdown signal.
    /// The task stops at its next await point once shutdown is signalled, and is aborted when
    /// the returned handle is dropped.
    pub fn spawn<F>(&self, name: &'static str, fut: F) -> ScopedTask
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let signal = self.wait_fut();
        ScopedTask::spawn(name, async move {
            tokio::select! {
                _ = signal => debug!(task = name, "stopping on shutdown signal"),
                _ = fut => {},
            }
        })
    }
}

/// Owned handle to a background task.
///
/// The task lives exactly as long as its handle: dropping the handle aborts it. This keeps
/// timers and polling loops tied to the component that started them.
#[derive(Debug)]
pub struct ScopedTask {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
}

impl ScopedTask {
    /// Spawn the future on the current runtime.
    pub fn spawn<F>(name: &'static str, fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            name,
            handle: Some(tokio::spawn(fut)),
        }
    }

    /// Name the task was spawned with.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// True once the task ran to completion or was aborted.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Wait for the task to finish on its own, e.g. after a shutdown signal.
    pub async fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    tracing::warn!(task = self.name, %err, "task failed");
                }
            }
        }
    }
}

impl Drop for ScopedTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn dropping_handle_aborts_task() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let task = {
            let ticks = ticks.clone();
            ScopedTask::spawn("ticker", async move {
                let mut interval = tokio::time::interval(Duration::from_secs(1));
                loop {
                    interval.tick().await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            })
        };
        tokio::time::sleep(Duration::from_millis(2500)).await;
        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 2);
        drop(task);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn shutdown_stops_spawned_tasks() {
        let shutdown = Shutdown::new();
        let task = shutdown.spawn("forever", futures::future::pending());
        assert!(!task.is_finished());
        shutdown.shutdown();
        tokio::time::timeout(Duration::from_secs(1), task.join())
            .await
            .expect("task should stop after shutdown");
    }
}
