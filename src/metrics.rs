use prometheus::{
    CounterVec, Encoder, HistogramVec, IntCounter, IntGauge, Registry, TextEncoder, histogram_opts,
    opts,
};

/// Prometheus metrics registry for the proxy core, scoped to this
/// crate's components (cache, upstream, query pipeline). Mirrors the
/// structure of the teacher's `DnsMetrics`, trimmed to what §4 names.
pub struct ProxyMetrics {
    registry: Registry,

    pub cache_hits: IntCounter,
    pub cache_misses: IntCounter,
    pub cache_evictions: IntCounter,
    pub cache_size: IntGauge,

    pub queries_total: CounterVec,
    pub query_duration: HistogramVec,
    pub concurrent_queries: IntGauge,

    pub upstream_requests: CounterVec,
    pub upstream_responses: CounterVec,
    pub upstream_response_time: HistogramVec,
    pub upstream_unhealthy: IntGauge,

    pub log_append_failures: IntCounter,
    pub log_dropped: IntCounter,
}

impl ProxyMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let cache_hits = IntCounter::with_opts(opts!(
            "heimdall_cache_hits_total",
            "Total number of response cache hits"
        ))?;
        let cache_misses = IntCounter::with_opts(opts!(
            "heimdall_cache_misses_total",
            "Total number of response cache misses"
        ))?;
        let cache_evictions = IntCounter::with_opts(opts!(
            "heimdall_cache_evictions_total",
            "Total number of response cache evictions"
        ))?;
        let cache_size = IntGauge::with_opts(opts!(
            "heimdall_cache_size",
            "Current number of entries in the response cache"
        ))?;

        let queries_total = CounterVec::new(
            opts!("heimdall_queries_total", "Total queries handled by status"),
            &["status"],
        )?;
        let query_duration = HistogramVec::new(
            histogram_opts!(
                "heimdall_query_duration_seconds",
                "End-to-end query handling duration"
            ),
            &["status"],
        )?;
        let concurrent_queries = IntGauge::with_opts(opts!(
            "heimdall_concurrent_queries",
            "Number of queries currently admitted and in flight"
        ))?;

        let upstream_requests = CounterVec::new(
            opts!("heimdall_upstream_requests_total", "Upstream requests sent"),
            &["upstream"],
        )?;
        let upstream_responses = CounterVec::new(
            opts!(
                "heimdall_upstream_responses_total",
                "Upstream responses received by outcome"
            ),
            &["upstream", "outcome"],
        )?;
        let upstream_response_time = HistogramVec::new(
            histogram_opts!(
                "heimdall_upstream_response_time_seconds",
                "Upstream round-trip time"
            ),
            &["upstream"],
        )?;
        let upstream_unhealthy = IntGauge::with_opts(opts!(
            "heimdall_upstream_unhealthy",
            "Number of upstreams currently marked unhealthy"
        ))?;

        let log_append_failures = IntCounter::with_opts(opts!(
            "heimdall_log_append_failures_total",
            "Log sink append failures"
        ))?;
        let log_dropped = IntCounter::with_opts(opts!(
            "heimdall_log_dropped_total",
            "Log records dropped because the ingestion queue was full"
        ))?;

        registry.register(Box::new(cache_hits.clone()))?;
        registry.register(Box::new(cache_misses.clone()))?;
        registry.register(Box::new(cache_evictions.clone()))?;
        registry.register(Box::new(cache_size.clone()))?;
        registry.register(Box::new(queries_total.clone()))?;
        registry.register(Box::new(query_duration.clone()))?;
        registry.register(Box::new(concurrent_queries.clone()))?;
        registry.register(Box::new(upstream_requests.clone()))?;
        registry.register(Box::new(upstream_responses.clone()))?;
        registry.register(Box::new(upstream_response_time.clone()))?;
        registry.register(Box::new(upstream_unhealthy.clone()))?;
        registry.register(Box::new(log_append_failures.clone()))?;
        registry.register(Box::new(log_dropped.clone()))?;

        Ok(Self {
            registry,
            cache_hits,
            cache_misses,
            cache_evictions,
            cache_size,
            queries_total,
            query_duration,
            concurrent_queries,
            upstream_requests,
            upstream_responses,
            upstream_response_time,
            upstream_unhealthy,
            log_append_failures,
            log_dropped,
        })
    }

    /// Render the current metric snapshot in Prometheus text format for
    /// the `/metrics` route (spec §4.H adapter surface).
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).ok();
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for ProxyMetrics {
    fn default() -> Self {
        Self::new().expect("metric registration cannot fail with static names")
    }
}
