use std::{
    collections::HashMap,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    task::{Context, Poll},
    time::Duration,
};

use aquaflux_core::VaultTransaction;
use aquaflux_metrics::Recorder;
use futures::Stream;
use shutdown::ScopedTask;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, info};

use crate::{metrics::ChannelCount, Metrics, SseEvent};

/// Tuning of the server-sent event channels.
#[derive(Clone, Debug)]
pub struct NotifierConfig {
    /// Time between heartbeats on an idle channel
    pub heartbeat_interval: Duration,
    /// Events buffered per channel before it counts as dead
    pub channel_capacity: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            channel_capacity: 64,
        }
    }
}

/// Outcome of a broadcast.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Channels that accepted the event
    pub delivered: usize,
    /// Channels that were closed or full and have been removed
    pub dropped: usize,
}

struct Channel {
    tx: mpsc::Sender<SseEvent>,
    _heartbeat: Option<ScopedTask>,
}

struct Inner {
    config: NotifierConfig,
    next_id: AtomicU64,
    channels: Mutex<HashMap<u64, Channel>>,
    metrics: Metrics,
}

impl Inner {
    fn channels(&self) -> MutexGuard<'_, HashMap<u64, Channel>> {
        // The map stays consistent even if a holder panicked.
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registry of connected server-sent event channels.
///
/// Clones share the same registry.
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("config", &self.inner.config)
            .field("channels", &self.channel_count())
            .finish()
    }
}

impl Notifier {
    /// Create an empty registry.
    pub fn new(config: NotifierConfig, metrics: Metrics) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                next_id: AtomicU64::new(0),
                channels: Mutex::new(HashMap::new()),
                metrics,
            }),
        }
    }

    /// Register a new client. The stream starts with a `connected` event and receives a
    /// heartbeat on every interval. Dropping the subscription deregisters it.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.inner.config.channel_capacity.max(1));
        // A fresh channel always has room for the first event.
        let _ = tx.try_send(SseEvent::Connected);
        let heartbeat = heartbeat(tx.clone(), self.inner.config.heartbeat_interval);
        let id = self.insert(tx, Some(heartbeat));
        info!(channel = id, "client subscribed");
        Subscription {
            id,
            rx,
            notifier: self.clone(),
        }
    }

    /// Register a raw channel without heartbeat. Returns its id.
    pub fn register(&self, tx: mpsc::Sender<SseEvent>) -> u64 {
        self.insert(tx, None)
    }

    fn insert(&self, tx: mpsc::Sender<SseEvent>, heartbeat: Option<ScopedTask>) -> u64 {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let count = {
            let mut channels = self.inner.channels();
            channels.insert(
                id,
                Channel {
                    tx,
                    _heartbeat: heartbeat,
                },
            );
            channels.len()
        };
        self.inner.metrics.record(&ChannelCount(count));
        id
    }

    /// Remove a channel and stop its heartbeat. Returns true when it was registered.
    pub fn unregister(&self, id: u64) -> bool {
        let (removed, count) = {
            let mut channels = self.inner.channels();
            let removed = channels.remove(&id);
            (removed, channels.len())
        };
        self.inner.metrics.record(&ChannelCount(count));
        // The heartbeat task is aborted here, outside of the lock.
        removed.is_some()
    }

    /// Remove every channel. Open subscriptions end once their buffered events are read.
    /// Returns how many channels were removed.
    pub fn disconnect_all(&self) -> usize {
        let removed: Vec<Channel> = self.inner.channels().drain().map(|(_, c)| c).collect();
        self.inner.metrics.record(&ChannelCount(0));
        if !removed.is_empty() {
            info!(channels = removed.len(), "disconnecting all clients");
        }
        removed.len()
    }

    /// Number of registered channels
    pub fn channel_count(&self) -> usize {
        self.inner.channels().len()
    }

    /// Send the event to every channel.
    ///
    /// Delivery never waits on a client. A channel that is closed or whose buffer is full is
    /// removed and the remaining channels still receive the event.
    pub fn broadcast(&self, event: &SseEvent) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let (removed, count) = {
            let mut channels = self.inner.channels();
            let mut dead = Vec::new();
            for (id, channel) in channels.iter() {
                match channel.tx.try_send(event.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        debug!(channel = id, "dropping channel with full buffer");
                        dead.push(*id);
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(channel = id, "dropping closed channel");
                        dead.push(*id);
                    }
                }
            }
            let removed: Vec<Channel> = dead.iter().filter_map(|id| channels.remove(id)).collect();
            (removed, channels.len())
        };
        report.dropped = removed.len();
        drop(removed);
        self.inner.metrics.record(&ChannelCount(count));
        self.inner.metrics.record(&report);
        debug!(
            event = event.kind(),
            delivered = report.delivered,
            dropped = report.dropped,
            "broadcast event"
        );
        report
    }

    /// Broadcast a `new_transactions` event. Nothing is sent for an empty list.
    pub fn broadcast_transactions(&self, transactions: &[VaultTransaction]) -> BroadcastReport {
        if transactions.is_empty() {
            return BroadcastReport::default();
        }
        self.broadcast(&SseEvent::NewTransactions {
            transactions: transactions.to_vec(),
        })
    }
}

fn heartbeat(tx: mpsc::Sender<SseEvent>, period: Duration) -> ScopedTask {
    ScopedTask::spawn("sse-heartbeat", async move {
        let mut ticks = interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticks.tick().await;
            match tx.try_send(SseEvent::Heartbeat) {
                Ok(()) | Err(TrySendError::Full(_)) => {}
                Err(TrySendError::Closed(_)) => break,
            }
        }
    })
}

/// Stream of events for one client. Dropping it deregisters the channel.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<SseEvent>,
    notifier: Notifier,
}

impl Subscription {
    /// Registry id of the channel
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next event, `None` once the channel was removed from the registry.
    pub async fn recv(&mut self) -> Option<SseEvent> {
        self.rx.recv().await
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Stream for Subscription {
    type Item = SseEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.notifier.unregister(self.id) {
            info!(channel = self.id, "client disconnected");
        }
    }
}
