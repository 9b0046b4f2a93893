use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static INSTALLED: OnceLock<Metrics> = OnceLock::new();

/// Histogram bucket boundaries for latency metrics (seconds).
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Thin handle around the global metrics recorder.
///
/// After `Metrics::install()` the `metrics` crate macros (`counter!`, `gauge!`,
/// `histogram!`) can be used anywhere in the codebase. The `PrometheusHandle`
/// is retained solely for rendering the `/metrics` endpoint.
#[derive(Clone)]
pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and register metric descriptions.
    ///
    /// The recorder is process-global; the first call installs it and later
    /// calls return the same handle.
    pub fn install() -> Self {
        INSTALLED.get_or_init(Self::install_inner).clone()
    }

    fn install_inner() -> Self {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
                LATENCY_BUCKETS,
            )
            .expect("valid matcher")
            .install_recorder()
            .expect("failed to install metrics recorder");

        // request path
        describe_counter!(
            "router_http_requests_total",
            Unit::Count,
            "Total HTTP requests proxied"
        );
        describe_histogram!(
            "router_http_request_duration_seconds",
            Unit::Seconds,
            "Total request duration from client perspective"
        );
        describe_histogram!(
            "router_backend_duration_seconds",
            Unit::Seconds,
            "Time spent in the backend exchange"
        );
        describe_gauge!(
            "router_http_requests_in_flight",
            Unit::Count,
            "Number of requests currently being proxied"
        );

        // route refresh
        describe_counter!(
            "router_route_refresh_total",
            Unit::Count,
            "Route reconciliation attempts against the route server"
        );
        describe_gauge!(
            "router_routes_loaded",
            Unit::Count,
            "Number of authorities currently in the route cache"
        );

        // connections
        describe_gauge!(
            "router_connections_active",
            Unit::Count,
            "Number of active downstream connections"
        );
        describe_counter!(
            "router_connections_total",
            Unit::Count,
            "Total downstream connections accepted"
        );

        Self { handle }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
