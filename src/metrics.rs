//! Prometheus metrics for bucketcache

use crate::storage::BucketAllocator;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};

/// Global metrics instance
pub struct Metrics {
    pub registry: Registry,

    // Command counters
    pub cmd_get: IntCounter,
    pub cmd_set: IntCounter,

    // Outcome counters
    pub get_hits: IntCounter,
    pub get_misses: IntCounter,
    pub set_stored: IntCounter,
    pub set_not_stored: IntCounter,

    // Datagram counters
    pub datagrams_received: IntCounter,
    pub datagrams_dropped: IntCounter,
    pub protocol_errors: IntCounter,

    // Bytes counters
    pub bytes_read: IntCounter,
    pub bytes_written: IntCounter,

    // Latency histograms
    pub cmd_latency: Histogram,

    // Allocator gauges
    pub pages_assigned: IntGauge,
    pub memory_reserved: IntGauge,
}

impl Metrics {
    /// Create a new metrics instance
    pub fn new() -> Self {
        let registry = Registry::new();

        let cmd_get = IntCounter::new("bucketcache_cmd_get_total", "Total GET commands").unwrap();
        let cmd_set = IntCounter::new("bucketcache_cmd_set_total", "Total SET commands").unwrap();

        let get_hits = IntCounter::new("bucketcache_get_hits_total", "Total GET hits").unwrap();
        let get_misses =
            IntCounter::new("bucketcache_get_misses_total", "Total GET misses").unwrap();
        let set_stored =
            IntCounter::new("bucketcache_set_stored_total", "Total SETs stored").unwrap();
        let set_not_stored = IntCounter::new(
            "bucketcache_set_not_stored_total",
            "Total SETs rejected by the allocator",
        )
        .unwrap();

        let datagrams_received = IntCounter::new(
            "bucketcache_datagrams_received_total",
            "Total datagrams received",
        )
        .unwrap();
        let datagrams_dropped = IntCounter::new(
            "bucketcache_datagrams_dropped_total",
            "Total datagrams dropped without a reply",
        )
        .unwrap();
        let protocol_errors =
            IntCounter::new("bucketcache_protocol_errors_total", "Total protocol errors").unwrap();

        let bytes_read =
            IntCounter::new("bucketcache_bytes_read_total", "Total bytes read").unwrap();
        let bytes_written =
            IntCounter::new("bucketcache_bytes_written_total", "Total bytes written").unwrap();

        let cmd_latency = Histogram::with_opts(
            HistogramOpts::new(
                "bucketcache_cmd_latency_seconds",
                "Command latency in seconds",
            )
            .buckets(vec![
                0.000_001, 0.000_005, 0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01,
            ]),
        )
        .unwrap();

        let pages_assigned = IntGauge::new(
            "bucketcache_pages_assigned",
            "Pages handed to size classes",
        )
        .unwrap();
        let memory_reserved = IntGauge::new(
            "bucketcache_memory_reserved_bytes",
            "Bytes reserved from the memory budget",
        )
        .unwrap();

        // Register all metrics
        registry.register(Box::new(cmd_get.clone())).unwrap();
        registry.register(Box::new(cmd_set.clone())).unwrap();
        registry.register(Box::new(get_hits.clone())).unwrap();
        registry.register(Box::new(get_misses.clone())).unwrap();
        registry.register(Box::new(set_stored.clone())).unwrap();
        registry.register(Box::new(set_not_stored.clone())).unwrap();
        registry
            .register(Box::new(datagrams_received.clone()))
            .unwrap();
        registry
            .register(Box::new(datagrams_dropped.clone()))
            .unwrap();
        registry
            .register(Box::new(protocol_errors.clone()))
            .unwrap();
        registry.register(Box::new(bytes_read.clone())).unwrap();
        registry.register(Box::new(bytes_written.clone())).unwrap();
        registry.register(Box::new(cmd_latency.clone())).unwrap();
        registry.register(Box::new(pages_assigned.clone())).unwrap();
        registry.register(Box::new(memory_reserved.clone())).unwrap();

        Self {
            registry,
            cmd_get,
            cmd_set,
            get_hits,
            get_misses,
            set_stored,
            set_not_stored,
            datagrams_received,
            datagrams_dropped,
            protocol_errors,
            bytes_read,
            bytes_written,
            cmd_latency,
            pages_assigned,
            memory_reserved,
        }
    }

    /// Copy the allocator's page and budget usage into the gauges
    #[allow(clippy::cast_possible_wrap)]
    pub fn observe_allocator(&self, allocator: &BucketAllocator) {
        self.pages_assigned.set(allocator.pages_assigned() as i64);
        self.memory_reserved.set(allocator.memory_reserved() as i64);
    }

    /// Get Prometheus formatted metrics
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
