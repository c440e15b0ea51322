use aquaflux_metrics::{register, Recorder};
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

use crate::BroadcastReport;

#[derive(Clone, Debug)]
pub struct ChannelCount(pub usize);

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct WebhookOutcome(pub &'static str);

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    outcome: &'static str,
}

impl From<&WebhookOutcome> for OutcomeLabels {
    fn from(value: &WebhookOutcome) -> Self {
        Self { outcome: value.0 }
    }
}

#[derive(Clone, Debug)]
/// Server-sent event and webhook metrics
pub struct Metrics {
    sse_channels: Gauge,
    broadcast_delivered: Counter,
    broadcast_dropped: Counter,
    webhook_requests: Family<OutcomeLabels, Counter>,
}

impl Metrics {
    /// Register and construct Metrics
    pub fn register(registry: &mut Registry) -> Self {
        let sub_registry = registry.sub_registry_with_prefix("aquaflux_notifier");

        register!(
            sse_channels,
            "Number of connected server-sent event channels",
            Gauge::default(),
            sub_registry
        );
        register!(
            broadcast_delivered,
            "Number of events delivered to a channel by a broadcast",
            Counter::default(),
            sub_registry
        );
        register!(
            broadcast_dropped,
            "Number of channels removed because a broadcast could not be delivered",
            Counter::default(),
            sub_registry
        );
        register!(
            webhook_requests,
            "Number of webhook requests by outcome",
            Family::<OutcomeLabels, Counter>::default(),
            sub_registry
        );

        Self {
            sse_channels,
            broadcast_delivered,
            broadcast_dropped,
            webhook_requests,
        }
    }
}

impl Recorder<ChannelCount> for Metrics {
    fn record(&self, event: &ChannelCount) {
        self.sse_channels.set(event.0 as i64);
    }
}

impl Recorder<BroadcastReport> for Metrics {
    fn record(&self, event: &BroadcastReport) {
        self.broadcast_delivered.inc_by(event.delivered as u64);
        self.broadcast_dropped.inc_by(event.dropped as u64);
    }
}

impl Recorder<WebhookOutcome> for Metrics {
    fn record(&self, event: &WebhookOutcome) {
        let labels: OutcomeLabels = event.into();
        self.webhook_requests.get_or_create(&labels).inc();
    }
}
