//! Logging, tracing and metrics setup shared by every AquaFlux service.
//!
//! Metrics are collected in a single process wide prometheus registry. Components register
//! their own metric structs through [`MetricsHandle::register`] and record events through the
//! [`Recorder`] trait.
pub mod config;
mod core;
mod logging;
mod push;

#[macro_use]
extern crate lazy_static;

use prometheus_client::registry::Registry;
use tokio::task::JoinHandle;

use crate::{config::Config, core::CORE};

pub use logging::init_local_tracing;

/// Recorder that can record metrics about an event.
pub trait Recorder<Event> {
    /// Record the given event.
    fn record(&self, event: &Event);
}

impl<S, Event> Recorder<Event> for std::sync::Arc<S>
where
    S: Recorder<Event>,
{
    fn record(&self, event: &Event) {
        self.as_ref().record(event);
    }
}

/// Declare a metric binding and register it with a registry under the binding's name.
#[macro_export]
macro_rules! register {
    ($name:ident, $help:expr, $metric:expr, $registry:ident) => {
        let $name = $metric;
        $registry.register(stringify!($name), $help, $name.clone());
    };
}

/// Owns the running exporters. Call [`MetricsHandle::shutdown`] before exiting to flush spans.
#[derive(Debug)]
pub struct MetricsHandle {
    push_task: Option<JoinHandle<()>>,
}

impl MetricsHandle {
    /// Install the subscriber and start the exporters enabled in `cfg`.
    ///
    /// Logging macros are silent until this returns.
    pub async fn new(cfg: Config) -> Result<Self, Box<dyn std::error::Error>> {
        logging::init_tracer(&cfg)?;
        let push_task = cfg.export.then(|| push::spawn_push_task(&cfg));
        Ok(Self { push_task })
    }

    /// Flush pending spans and stop pushing metrics.
    pub fn shutdown(&self) {
        opentelemetry::global::shutdown_tracer_provider();
        if let Some(task) = &self.push_task {
            task.abort();
        }
    }

    /// Register metrics with the process wide registry.
    pub fn register<T, F>(f: F) -> T
    where
        F: FnOnce(&mut Registry) -> T,
    {
        CORE.register(f)
    }

    /// Encode all registered metrics in the OpenMetrics text format.
    pub fn encode() -> Vec<u8> {
        CORE.encode()
    }
}

#[cfg(test)]
mod tests {
    use prometheus_client::metrics::counter::Counter;

    use super::*;

    struct Hits {
        hits: Counter,
    }

    impl Hits {
        fn register(registry: &mut Registry) -> Self {
            let sub_registry = registry.sub_registry_with_prefix("test_metrics");
            register!(hits, "Number of hits", Counter::default(), sub_registry);
            Self { hits }
        }
    }

    impl Recorder<u64> for Hits {
        fn record(&self, event: &u64) {
            self.hits.inc_by(*event);
        }
    }

    #[test]
    fn registered_metrics_are_encoded() {
        let hits = std::sync::Arc::new(MetricsHandle::register(Hits::register));
        hits.record(&3);
        let text = String::from_utf8(MetricsHandle::encode()).unwrap();
        assert!(text.contains("test_metrics_hits_total 3"), "{text}");
    }
}
