use std::time::Duration;

use aquaflux_metrics::{register, Recorder};
use axum::{
    extract::{MatchedPath, State},
    http::Request,
    middleware::Next,
    response::Response,
};
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

/// Metrics for the HTTP API
#[derive(Clone, Debug)]
pub struct Metrics {
    requests: Family<RequestLabels, Counter>,
    request_durations: Family<RequestLabels, Histogram>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct RequestLabels {
    method: String,
    path: String,
    status: u16,
}

impl From<&RequestEvent> for RequestLabels {
    fn from(value: &RequestEvent) -> Self {
        Self {
            method: value.method.clone(),
            path: value.path.clone(),
            status: value.status,
        }
    }
}

impl Metrics {
    /// Register and construct Metrics
    pub fn register(registry: &mut Registry) -> Self {
        let sub_registry = registry.sub_registry_with_prefix("aquaflux_http");

        register!(
            requests,
            "Number of HTTP requests",
            Family::<RequestLabels, Counter>::default(),
            sub_registry
        );
        register!(
            request_durations,
            "Duration of HTTP requests until the response head was ready",
            Family::<RequestLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.005, 2.0, 20))
            }),
            sub_registry
        );

        Self {
            requests,
            request_durations,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RequestEvent {
    pub(crate) path: String,
    pub(crate) method: String,
    pub(crate) status: u16,
    pub(crate) duration: Duration,
}

impl Recorder<RequestEvent> for Metrics {
    fn record(&self, event: &RequestEvent) {
        let labels = event.into();
        self.requests.get_or_create(&labels).inc();
        self.request_durations
            .get_or_create(&labels)
            .observe(event.duration.as_secs_f64());
    }
}

/// Middleware recording every routed request, labelled with its route pattern.
pub(crate) async fn track_requests<B>(
    State(metrics): State<Metrics>,
    req: Request<B>,
    next: Next<B>,
) -> Response {
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());
    let method = req.method().to_string();
    let start = Instant::now();
    let response = next.run(req).await;
    metrics.record(&RequestEvent {
        path,
        method,
        status: response.status().as_u16(),
        duration: start.elapsed(),
    });
    response
}
