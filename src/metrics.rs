//! Metrics collection and export module

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Instant;

/// Composition metrics registry
pub struct ComposerMetrics {
    registry: Registry,

    // Counters
    pub compositions_total: IntCounter,
    pub compositions_composed: IntCounter,
    pub compositions_rejected: IntCounterVec,
    pub lookup_addresses_loaded: IntCounter,
    pub tables_fetched: IntCounter,
    pub table_fetch_failures: IntCounter,

    // Histograms
    pub composition_latency: Histogram,
    pub composed_tx_bytes: Histogram,
    pub table_fetch_latency: Histogram,
}

impl ComposerMetrics {
    /// Create new metrics instance
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let compositions_total = IntCounter::with_opts(Opts::new(
            "compositions_total",
            "Total number of composition requests",
        ))?;

        let compositions_composed = IntCounter::with_opts(Opts::new(
            "compositions_composed",
            "Number of compositions that produced an envelope",
        ))?;

        let compositions_rejected = IntCounterVec::new(
            Opts::new(
                "compositions_rejected",
                "Number of rejected compositions by error category",
            ),
            &["category"],
        )?;

        let lookup_addresses_loaded = IntCounter::with_opts(Opts::new(
            "lookup_addresses_loaded",
            "Addresses encoded through lookup tables in composed messages",
        ))?;

        let tables_fetched =
            IntCounter::with_opts(Opts::new("tables_fetched", "Lookup tables fetched"))?;

        let table_fetch_failures = IntCounter::with_opts(Opts::new(
            "table_fetch_failures",
            "Lookup table fetches that failed after retries",
        ))?;

        let composition_latency = Histogram::with_opts(
            HistogramOpts::new("composition_latency_seconds", "Composition latency")
                .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05]),
        )?;

        let composed_tx_bytes = Histogram::with_opts(
            HistogramOpts::new("composed_tx_bytes", "Serialized size of composed transactions")
                .buckets(vec![256.0, 512.0, 768.0, 1024.0, 1232.0]),
        )?;

        let table_fetch_latency = Histogram::with_opts(
            HistogramOpts::new("table_fetch_latency_seconds", "Lookup table fetch latency")
                .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]),
        )?;

        registry.register(Box::new(compositions_total.clone()))?;
        registry.register(Box::new(compositions_composed.clone()))?;
        registry.register(Box::new(compositions_rejected.clone()))?;
        registry.register(Box::new(lookup_addresses_loaded.clone()))?;
        registry.register(Box::new(tables_fetched.clone()))?;
        registry.register(Box::new(table_fetch_failures.clone()))?;
        registry.register(Box::new(composition_latency.clone()))?;
        registry.register(Box::new(composed_tx_bytes.clone()))?;
        registry.register(Box::new(table_fetch_latency.clone()))?;

        Ok(Self {
            registry,
            compositions_total,
            compositions_composed,
            compositions_rejected,
            lookup_addresses_loaded,
            tables_fetched,
            table_fetch_failures,
            composition_latency,
            composed_tx_bytes,
            table_fetch_latency,
        })
    }

    pub fn record_rejection(&self, category: &str) {
        self.compositions_rejected
            .with_label_values(&[category])
            .inc();
    }

    /// Render the registry in the Prometheus text exposition format
    pub fn encode_text(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Global metrics instance
pub fn metrics() -> &'static ComposerMetrics {
    static METRICS: once_cell::sync::Lazy<ComposerMetrics> = once_cell::sync::Lazy::new(|| {
        ComposerMetrics::new().expect("Failed to initialize metrics")
    });
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
        histogram.observe(self.elapsed_secs());
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    pub fn elapsed_micros(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_micros()).unwrap_or(u64::MAX)
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
