use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings of the logging, tracing and metrics subsystems of one process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Cargo package name of the service.
    pub service_name: String,
    /// Name of this process instance, random unless set.
    pub instance_id: String,
    /// Cargo package version of the service.
    pub version: String,
    /// Deployment environment, e.g. dev or prod.
    pub service_env: String,
    /// Push the registry to the prometheus gateway.
    pub export: bool,
    /// Export spans to the OTLP collector.
    pub tracing: bool,
    /// OTLP collector endpoint.
    pub collector_endpoint: String,
    /// Prometheus push gateway endpoint.
    pub prom_gateway_endpoint: String,
    /// Time between two pushes to the gateway.
    pub push_interval: Duration,
    /// Format of the log lines written to stdout.
    pub log_format: LogFormat,
}

/// Format of log events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LogFormat {
    /// Pretty printed over several lines
    #[default]
    MultiLine,
    /// One compact line per event
    SingleLine,
    /// Newline delimited JSON
    Json,
}

impl Config {
    /// Set the service name.
    pub fn with_service_name(mut self, name: String) -> Self {
        self.service_name = name;
        self
    }

    /// Set the service version.
    pub fn with_version(mut self, version: String) -> Self {
        self.version = version;
        self
    }

    /// Push gateway URL grouping this instance under its service job.
    pub fn push_url(&self) -> String {
        format!(
            "{}/metrics/job/{}/instance/{}",
            self.prom_gateway_endpoint.trim_end_matches('/'),
            self.service_name,
            self.instance_id
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "aquaflux".to_string(),
            instance_id: names::Generator::default()
                .next()
                .unwrap_or_else(|| "unnamed".to_string()),
            version: "unknown".to_string(),
            service_env: "dev".to_string(),
            export: false,
            tracing: false,
            collector_endpoint: "http://localhost:4317".to_string(),
            prom_gateway_endpoint: "http://localhost:9091".to_string(),
            push_interval: Duration::from_secs(5),
            log_format: LogFormat::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_url_groups_by_service_and_instance() {
        let cfg = Config {
            instance_id: "quiet-heron".to_string(),
            prom_gateway_endpoint: "http://gateway:9091/".to_string(),
            ..Default::default()
        }
        .with_service_name("aquaflux-one".to_string());
        assert_eq!(
            cfg.push_url(),
            "http://gateway:9091/metrics/job/aquaflux-one/instance/quiet-heron"
        );
    }

    #[test]
    fn defaults_export_nothing() {
        let cfg = Config::default();
        assert!(!cfg.export);
        assert!(!cfg.tracing);
        assert_eq!(cfg.log_format, LogFormat::MultiLine);
        assert!(!cfg.instance_id.is_empty());
    }
}
