use std::net::SocketAddr;

use anyhow::Result;
use aquaflux_api::metrics_router;
use aquaflux_metrics::config::Config as MetricsConfig;
use prometheus_client::{encoding::EncodeLabelSet, metrics::info::Info as InfoMetric, registry::Registry};
use shutdown::ShutdownSignal;
use tokio::task::JoinHandle;

/// Identity of this process.
#[derive(Clone, Debug)]
pub struct Info {
    /// Name of the service.
    pub service_name: String,
    /// Semantic version of the build.
    pub version: String,
    /// Unique name generated for this invocation of the process.
    pub instance_id: String,
}

impl Info {
    pub fn new() -> Self {
        Self {
            service_name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            instance_id: names::Generator::default()
                .next()
                .unwrap_or_else(|| "unnamed".to_string()),
        }
    }

    pub fn apply_to_metrics_config(&self, cfg: &mut MetricsConfig) {
        cfg.service_name.clone_from(&self.service_name);
        cfg.version.clone_from(&self.version);
        cfg.instance_id.clone_from(&self.instance_id);
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct InfoLabels {
    service_name: String,
    version: String,
    instance_id: String,
}

impl From<&Info> for InfoLabels {
    fn from(info: &Info) -> Self {
        Self {
            service_name: info.service_name.clone(),
            version: info.version.clone(),
            instance_id: info.instance_id.clone(),
        }
    }
}

/// Process level metrics.
pub struct Metrics;

impl Metrics {
    pub fn register(info: &Info, registry: &mut Registry) -> Self {
        let sub_registry = registry.sub_registry_with_prefix("aquaflux");
        sub_registry.register(
            "one",
            "Information about the aquaflux process",
            InfoMetric::new(InfoLabels::from(info)),
        );
        Self
    }
}

/// Serve `/metrics` on its own listener until `shutdown` resolves.
pub fn start(
    addr: &SocketAddr,
    shutdown: ShutdownSignal,
) -> Result<JoinHandle<Result<(), hyper::Error>>> {
    let server = axum::Server::try_bind(addr)?
        .serve(metrics_router().into_make_service())
        .with_graceful_shutdown(shutdown);
    Ok(tokio::spawn(server))
}
