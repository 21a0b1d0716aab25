//! Metrics collection module

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry};
use std::time::Instant;

/// Global metrics registry
pub struct Metrics {
    registry: Registry,

    // Scan counters
    pub scans_started: IntCounter,
    pub scans_succeeded: IntCounter,
    pub scans_failed: IntCounter,
    pub scans_discarded: IntCounter,
    pub vaults_dropped: IntCounter,
    pub rate_limit_retries: IntCounter,

    // Cache counters
    pub cache_hits: IntCounter,
    pub cache_misses: IntCounter,
    pub cache_joins: IntCounter,
    pub cache_invalidations: IntCounter,

    // Flow counters
    pub flows_succeeded: IntCounter,
    pub flows_failed: IntCounter,
    pub approvals_skipped: IntCounter,

    // Gauges
    pub cached_vaults: IntGauge,

    // Histograms
    pub scan_latency: Histogram,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let scans_started =
            IntCounter::with_opts(Opts::new("vault_scans_started", "Full registry scans started"))?;
        let scans_succeeded = IntCounter::with_opts(Opts::new(
            "vault_scans_succeeded",
            "Full registry scans that completed",
        ))?;
        let scans_failed =
            IntCounter::with_opts(Opts::new("vault_scans_failed", "Full registry scans aborted"))?;
        let scans_discarded = IntCounter::with_opts(Opts::new(
            "vault_scans_discarded",
            "Scan results dropped because the cache moved to a newer generation",
        ))?;
        let vaults_dropped = IntCounter::with_opts(Opts::new(
            "vaults_dropped",
            "Vaults skipped because an attribute read failed",
        ))?;
        let rate_limit_retries = IntCounter::with_opts(Opts::new(
            "rpc_rate_limit_retries",
            "Reads retried after a rate-limit response",
        ))?;

        let cache_hits = IntCounter::with_opts(Opts::new("vault_cache_hits", "Fresh cache hits"))?;
        let cache_misses =
            IntCounter::with_opts(Opts::new("vault_cache_misses", "Cache lookups that scanned"))?;
        let cache_joins = IntCounter::with_opts(Opts::new(
            "vault_cache_joins",
            "Cache lookups that joined an in-flight scan",
        ))?;
        let cache_invalidations =
            IntCounter::with_opts(Opts::new("vault_cache_invalidations", "Explicit invalidations"))?;

        let flows_succeeded =
            IntCounter::with_opts(Opts::new("tx_flows_succeeded", "Transaction flows completed"))?;
        let flows_failed =
            IntCounter::with_opts(Opts::new("tx_flows_failed", "Transaction flows failed"))?;
        let approvals_skipped = IntCounter::with_opts(Opts::new(
            "tx_approvals_skipped",
            "Two-phase flows that found sufficient allowance",
        ))?;

        let cached_vaults =
            IntGauge::with_opts(Opts::new("vault_cache_size", "Vaults currently cached"))?;

        let scan_latency = Histogram::with_opts(
            HistogramOpts::new("vault_scan_latency_seconds", "Full registry scan latency")
                .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
        )?;

        // Register all metrics
        registry.register(Box::new(scans_started.clone()))?;
        registry.register(Box::new(scans_succeeded.clone()))?;
        registry.register(Box::new(scans_failed.clone()))?;
        registry.register(Box::new(scans_discarded.clone()))?;
        registry.register(Box::new(vaults_dropped.clone()))?;
        registry.register(Box::new(rate_limit_retries.clone()))?;
        registry.register(Box::new(cache_hits.clone()))?;
        registry.register(Box::new(cache_misses.clone()))?;
        registry.register(Box::new(cache_joins.clone()))?;
        registry.register(Box::new(cache_invalidations.clone()))?;
        registry.register(Box::new(flows_succeeded.clone()))?;
        registry.register(Box::new(flows_failed.clone()))?;
        registry.register(Box::new(approvals_skipped.clone()))?;
        registry.register(Box::new(cached_vaults.clone()))?;
        registry.register(Box::new(scan_latency.clone()))?;

        Ok(Self {
            registry,
            scans_started,
            scans_succeeded,
            scans_failed,
            scans_discarded,
            vaults_dropped,
            rate_limit_retries,
            cache_hits,
            cache_misses,
            cache_joins,
            cache_invalidations,
            flows_succeeded,
            flows_failed,
            approvals_skipped,
            cached_vaults,
            scan_latency,
        })
    }

    /// Get the registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> =
        once_cell::sync::Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
    &METRICS
}

/// Timer helper for measuring operation duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn observe_duration(&self, histogram: &Histogram) {
        histogram.observe(self.start.elapsed().as_secs_f64());
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
