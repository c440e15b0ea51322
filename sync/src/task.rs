use std::time::Duration;

use aquaflux_cache::CacheBackend;
use aquaflux_chain::ChainReader;
use aquaflux_core::VaultTransaction;
use aquaflux_notifier::Notifier;
use shutdown::{ScopedTask, Shutdown};
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

use crate::Synchronizer;

/// Background polling loop of the vault synchronizer.
///
/// Every tick runs one sync cycle and broadcasts the transactions it discovered. The loop
/// stops on shutdown and is aborted when the handle is dropped.
#[derive(Debug)]
pub struct SyncTask {
    task: ScopedTask,
}

impl SyncTask {
    /// Start polling. The first cycle runs immediately.
    pub fn spawn<R, B>(
        synchronizer: Synchronizer<R, VaultTransaction, B>,
        notifier: Notifier,
        period: Duration,
        shutdown: &Shutdown,
    ) -> Self
    where
        R: ChainReader + 'static,
        B: CacheBackend<VaultTransaction> + 'static,
    {
        info!(period_secs = period.as_secs_f64(), "starting vault sync task");
        let task = shutdown.spawn("vault-sync", async move {
            let mut ticks = interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                let report = synchronizer.sync_once().await;
                notifier.broadcast_transactions(&report.new_transactions);
            }
        });
        Self { task }
    }

    /// True once the loop stopped
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop to stop after a shutdown signal.
    pub async fn join(self) {
        self.task.join().await
    }
}
