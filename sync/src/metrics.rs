use aquaflux_metrics::{register, Recorder};
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct CycleEvent {
    pub scope: &'static str,
    pub outcome: &'static str,
}

#[derive(Clone, Debug)]
pub struct WindowEvent {
    pub scope: &'static str,
    pub failed_queries: usize,
    pub missing_timestamps: usize,
    pub added: usize,
}

#[derive(Clone, Debug)]
pub struct CheckpointEvent {
    pub scope: &'static str,
    pub block: u64,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CycleLabels {
    scope: &'static str,
    outcome: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ScopeLabels {
    scope: &'static str,
}

#[derive(Clone, Debug)]
/// Synchronization metrics
pub struct Metrics {
    cycles: Family<CycleLabels, Counter>,
    windows: Family<ScopeLabels, Counter>,
    transactions_added: Family<ScopeLabels, Counter>,
    rpc_failures: Family<ScopeLabels, Counter>,
    last_checked_block: Family<ScopeLabels, Gauge>,
}

impl Metrics {
    /// Register and construct Metrics
    pub fn register(registry: &mut Registry) -> Self {
        let sub_registry = registry.sub_registry_with_prefix("aquaflux_sync");

        register!(
            cycles,
            "Number of sync cycles by outcome",
            Family::<CycleLabels, Counter>::default(),
            sub_registry
        );
        register!(
            windows,
            "Number of block windows read",
            Family::<ScopeLabels, Counter>::default(),
            sub_registry
        );
        register!(
            transactions_added,
            "Number of transactions not known before a sync",
            Family::<ScopeLabels, Counter>::default(),
            sub_registry
        );
        register!(
            rpc_failures,
            "Number of failed transfer queries and timestamp lookups",
            Family::<ScopeLabels, Counter>::default(),
            sub_registry
        );
        register!(
            last_checked_block,
            "Highest block already scanned",
            Family::<ScopeLabels, Gauge>::default(),
            sub_registry
        );

        Self {
            cycles,
            windows,
            transactions_added,
            rpc_failures,
            last_checked_block,
        }
    }
}

impl Recorder<CycleEvent> for Metrics {
    fn record(&self, event: &CycleEvent) {
        self.cycles
            .get_or_create(&CycleLabels {
                scope: event.scope,
                outcome: event.outcome,
            })
            .inc();
    }
}

impl Recorder<WindowEvent> for Metrics {
    fn record(&self, event: &WindowEvent) {
        let labels = ScopeLabels { scope: event.scope };
        self.windows.get_or_create(&labels).inc();
        self.transactions_added
            .get_or_create(&labels)
            .inc_by(event.added as u64);
        let failures = event.failed_queries + event.missing_timestamps;
        if failures > 0 {
            self.rpc_failures
                .get_or_create(&labels)
                .inc_by(failures as u64);
        }
    }
}

impl Recorder<CheckpointEvent> for Metrics {
    fn record(&self, event: &CheckpointEvent) {
        self.last_checked_block
            .get_or_create(&ScopeLabels { scope: event.scope })
            .set(event.block as i64);
    }
}
