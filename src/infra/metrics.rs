use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder};

const NAMESPACE: &str = "proxy";

/// Request-path counters and the origin latency histogram, all registered
/// against a private registry rendered by the `/metrics` endpoint.
pub struct Metrics {
    registry: Registry,
    pub cache_hits: IntCounter,
    pub cache_misses: IntCounter,
    pub cache_stales: IntCounter,
    pub origin_errors: IntCounter,
    pub origin_latency: Histogram,
    pub bytes_served: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let cache_hits = IntCounter::with_opts(
            Opts::new("cache_hits_total", "Number of cache hits").namespace(NAMESPACE),
        )?;
        let cache_misses = IntCounter::with_opts(
            Opts::new("cache_misses_total", "Number of cache misses").namespace(NAMESPACE),
        )?;
        let cache_stales = IntCounter::with_opts(
            Opts::new("cache_stale_total", "Number of stale cache reuses").namespace(NAMESPACE),
        )?;
        let origin_errors = IntCounter::with_opts(
            Opts::new("origin_errors_total", "Number of origin errors").namespace(NAMESPACE),
        )?;
        let origin_latency = Histogram::with_opts(
            HistogramOpts::new("origin_latency_seconds", "Latency of origin fetches")
                .namespace(NAMESPACE),
        )?;
        let bytes_served = IntCounter::with_opts(
            Opts::new("bytes_served_total", "Total bytes served to clients").namespace(NAMESPACE),
        )?;

        registry.register(Box::new(cache_hits.clone()))?;
        registry.register(Box::new(cache_misses.clone()))?;
        registry.register(Box::new(cache_stales.clone()))?;
        registry.register(Box::new(origin_errors.clone()))?;
        registry.register(Box::new(origin_latency.clone()))?;
        registry.register(Box::new(bytes_served.clone()))?;

        Ok(Self {
            registry,
            cache_hits,
            cache_misses,
            cache_stales,
            origin_errors,
            origin_latency,
            bytes_served,
        })
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
