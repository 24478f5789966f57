use anyhow::{anyhow, Result};
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "aggregator_source_success_total",
            "Source agent calls that returned offers in time."
        );
        describe_counter!(
            "aggregator_source_failures_total",
            "Source agent calls that errored or timed out."
        );
        describe_counter!(
            "aggregator_circuit_skips_total",
            "Source agent calls skipped because the circuit was open."
        );
        describe_counter!(
            "aggregator_cache_hits_total",
            "Failed-source fallbacks that found a fresh cache entry."
        );
        describe_counter!(
            "aggregator_cache_misses_total",
            "Failed-source fallbacks with no fresh cache entry."
        );
        describe_counter!(
            "aggregator_offers_total",
            "Offers returned after dedup and normalization."
        );
        describe_counter!(
            "aggregator_feed_items_total",
            "Offers produced by JSON feed agents."
        );
        describe_histogram!(
            "aggregator_orchestrate_ms",
            "End-to-end orchestration time in milliseconds."
        );
        describe_histogram!(
            "aggregator_feed_parse_ms",
            "Offer feed parse time in milliseconds."
        );
        describe_gauge!("aggregator_cache_ttl_secs", "Configured result cache TTL.");
    });
}

#[derive(Clone)]
pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder once per process; later calls reuse it.
    pub fn init(cache_ttl_secs: i64) -> Result<Self> {
        static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();
        let handle = HANDLE
            .get_or_try_init(|| {
                PrometheusBuilder::new()
                    .install_recorder()
                    .map_err(|e| anyhow!("prometheus: install recorder: {e}"))
            })?
            .clone();

        ensure_metrics_described();
        gauge!("aggregator_cache_ttl_secs").set(cache_ttl_secs as f64);

        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router<S>(&self) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
