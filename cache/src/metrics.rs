use std::time::Duration;

use aquaflux_metrics::{register, Recorder};
use async_trait::async_trait;
use futures::Future;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{
        counter::Counter,
        family::Family,
        histogram::{exponential_buckets, Histogram},
    },
    registry::Registry,
};
use tokio::time::Instant;

use crate::{CacheBackend, CacheEntry, CacheSnapshot, Result};

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct BackendCall {
    pub name: &'static str,
    pub duration: Duration,
    pub ok: bool,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CallLabels {
    name: &'static str,
}

impl From<&BackendCall> for CallLabels {
    fn from(value: &BackendCall) -> Self {
        Self { name: value.name }
    }
}

#[derive(Clone, Debug)]
/// Cache persistence metrics
pub struct Metrics {
    backend_call_durations: Family<CallLabels, Histogram>,
    backend_call_failures: Family<CallLabels, Counter>,
}

impl Metrics {
    /// Register and construct Metrics
    pub fn register(registry: &mut Registry) -> Self {
        let sub_registry = registry.sub_registry_with_prefix("aquaflux_cache");

        register!(
            backend_call_durations,
            "Durations of cache backend calls in seconds",
            Family::<CallLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 16))
            }),
            sub_registry
        );
        register!(
            backend_call_failures,
            "Number of cache backend calls that failed",
            Family::<CallLabels, Counter>::default(),
            sub_registry
        );

        Self {
            backend_call_durations,
            backend_call_failures,
        }
    }
}

impl Recorder<BackendCall> for Metrics {
    fn record(&self, event: &BackendCall) {
        let labels: CallLabels = event.into();
        self.backend_call_durations
            .get_or_create(&labels)
            .observe(event.duration.as_secs_f64());
        if !event.ok {
            self.backend_call_failures.get_or_create(&labels).inc();
        }
    }
}

/// Implement the CacheBackend and record metrics
#[derive(Debug, Clone)]
pub struct BackendMetricsMiddleware<B> {
    backend: B,
    metrics: Metrics,
}

impl<B> BackendMetricsMiddleware<B> {
    /// Construct a new BackendMetricsMiddleware.
    /// The metrics should have already be registered.
    pub fn new(backend: B, metrics: Metrics) -> Self {
        Self { backend, metrics }
    }

    async fn record<T>(
        metrics: &Metrics,
        name: &'static str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let start = Instant::now();
        let ret = fut.await;
        let event = BackendCall {
            name,
            duration: start.elapsed(),
            ok: ret.is_ok(),
        };
        metrics.record(&event);
        ret
    }
}

#[async_trait]
impl<T, B> CacheBackend<T> for BackendMetricsMiddleware<B>
where
    T: CacheEntry,
    B: CacheBackend<T>,
{
    async fn load(&self) -> Result<Option<CacheSnapshot<T>>> {
        Self::record(&self.metrics, "load", self.backend.load()).await
    }

    async fn save(&self, snapshot: &CacheSnapshot<T>) -> Result<()> {
        Self::record(&self.metrics, "save", self.backend.save(snapshot)).await
    }

    async fn clear(&self) -> Result<()> {
        Self::record(&self.metrics, "clear", self.backend.clear()).await
    }
}

#[cfg(test)]
mod tests {
    use aquaflux_core::VaultTransaction;
    use test_log::test;

    use super::*;
    use crate::MemoryBackend;

    #[test(tokio::test)]
    async fn middleware_records_calls() {
        let mut registry = Registry::default();
        let metrics = Metrics::register(&mut registry);
        let backend = BackendMetricsMiddleware::new(
            MemoryBackend::<VaultTransaction>::new(),
            metrics,
        );
        backend.save(&CacheSnapshot::default()).await.unwrap();
        assert!(backend.load().await.unwrap().is_some());

        let mut text = String::new();
        prometheus_client::encoding::text::encode(&mut text, &registry).unwrap();
        assert!(
            text.contains("aquaflux_cache_backend_call_durations_count{name=\"save\"} 1"),
            "{text}"
        );
    }
}
