use std::{
    env::consts::{ARCH, OS},
    error::Error,
    time::Duration,
};

use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{propagation::TraceContextPropagator, trace, Resource};
use tracing::{metadata::LevelFilter, Subscriber};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt, EnvFilter, Layer,
};

use crate::config::{Config, LogFormat};

/// `RUST_LOG` filter, INFO when unset.
fn env_filter() -> Result<EnvFilter, Box<dyn Error>> {
    Ok(EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?)
}

/// Stdout layer in the requested format. JSON output never carries ANSI colors.
fn log_layer<S>(format: LogFormat, filter: EnvFilter) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let layer = fmt::layer().with_ansi(true);
    match format {
        LogFormat::MultiLine => layer.pretty().with_filter(filter).boxed(),
        LogFormat::SingleLine => layer.compact().with_filter(filter).boxed(),
        LogFormat::Json => layer.json().with_filter(filter).boxed(),
    }
}

fn otlp_resource(cfg: &Config) -> Resource {
    Resource::new(vec![
        KeyValue::new("instance.id", cfg.instance_id.clone()),
        KeyValue::new("service.name", cfg.service_name.clone()),
        KeyValue::new("service.version", cfg.version.clone()),
        KeyValue::new("service.os", OS),
        KeyValue::new("service.arch", ARCH),
        KeyValue::new("service.environment", cfg.service_env.clone()),
    ])
}

/// For use in CLI tools that are writing to stdout without metrics export.
pub fn init_local_tracing(format: LogFormat) -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(log_layer(format, env_filter()?))
        .try_init()?;
    Ok(())
}

/// Install the stdout logger and, when enabled, the OTLP span exporter.
pub(crate) fn init_tracer(cfg: &Config) -> Result<(), Box<dyn Error>> {
    let otlp_layer = if cfg.tracing {
        global::set_text_map_propagator(TraceContextPropagator::new());
        let exporter = opentelemetry_otlp::new_exporter()
            .tonic()
            .with_endpoint(cfg.collector_endpoint.clone())
            .with_timeout(Duration::from_secs(5));
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(exporter)
            .with_trace_config(trace::config().with_resource(otlp_resource(cfg)))
            .install_batch(opentelemetry_sdk::runtime::Tokio)?;
        Some(
            tracing_opentelemetry::layer()
                .with_tracer(tracer)
                .with_filter(env_filter()?),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(log_layer(cfg.log_format, env_filter()?))
        .with(otlp_layer)
        .try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_describes_the_instance() {
        let cfg = Config {
            instance_id: "calm-lynx".to_string(),
            service_env: "prod".to_string(),
            ..Default::default()
        };
        let resource = otlp_resource(&cfg);
        assert_eq!(
            resource
                .get("instance.id".into())
                .map(|v| v.as_str().into_owned()),
            Some("calm-lynx".to_string())
        );
        assert_eq!(
            resource
                .get("service.environment".into())
                .map(|v| v.as_str().into_owned()),
            Some("prod".to_string())
        );
    }
}
