use std::env;
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{info, warn};

pub const SEARCH_REQUESTS: &str = "hm_search_requests_total";
pub const SEARCH_DURATION: &str = "hm_search_duration_seconds";
pub const SEARCH_EMPTY: &str = "hm_search_empty_total";
pub const SEARCH_SUGGESTIONS: &str = "hm_search_suggestions_total";

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Starts the Prometheus exporter on `0.0.0.0:<port>`, port taken from
/// `port_env` or `default_port`. Later calls return the first handle.
pub fn init_metrics(port_env: &str, default_port: u16) -> Option<&'static PrometheusHandle> {
    if let Some(existing) = PROMETHEUS_HANDLE.get() {
        return Some(existing);
    }

    let port = env::var(port_env)
        .ok()
        .and_then(|raw| raw.trim().parse::<u16>().ok())
        .unwrap_or(default_port);

    match PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install_recorder()
    {
        Ok(handle) => {
            let _ = PROMETHEUS_HANDLE.set(handle);
            info!(metrics_port = port, "prometheus exporter started");
        }
        Err(err) => warn!(error = %err, metrics_port = port, "prometheus exporter not started"),
    }
    PROMETHEUS_HANDLE.get()
}

/// Which endpoint served the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    Search,
    Count,
}

impl SearchKind {
    fn label(self) -> &'static str {
        match self {
            SearchKind::Search => "search",
            SearchKind::Count => "count",
        }
    }
}

/// Records one finished request. `outcome` is a short, bounded label
/// (`ok`, `invalid`, `unavailable`, `error`).
pub fn record_search(kind: SearchKind, outcome: &'static str, elapsed: Duration) {
    counter!(SEARCH_REQUESTS, "kind" => kind.label(), "outcome" => outcome).increment(1);
    histogram!(SEARCH_DURATION, "kind" => kind.label()).record(elapsed.as_secs_f64());
}

pub fn record_empty_search() {
    counter!(SEARCH_EMPTY).increment(1);
}

/// Counts the suggestions offered for a scarce result page.
pub fn record_suggestions(occupations: usize, distances: usize) {
    counter!(SEARCH_SUGGESTIONS, "type" => "occupation").increment(occupations as u64);
    counter!(SEARCH_SUGGESTIONS, "type" => "distance").increment(distances as u64);
}
