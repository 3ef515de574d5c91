//! Metrics collection
//!
//! Prometheus-compatible counters for the quorum engine:
//! - write/read outcomes (quorum reached or not)
//! - per-replica failures, so divergence-prone replicas stand out
//! - request counts and latency histograms per HTTP endpoint

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Histogram bucket boundaries for latency measurements (in milliseconds)
const LATENCY_BUCKETS: [f64; 11] = [
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
];

/// A simple histogram implementation for latency tracking
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: Vec<f64>,
    // Microseconds, to keep sub-millisecond precision in an integer.
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new() -> Self {
        Self::with_buckets(&LATENCY_BUCKETS)
    }

    pub fn with_buckets(boundaries: &[f64]) -> Self {
        Self {
            buckets: (0..=boundaries.len()).map(|_| AtomicU64::new(0)).collect(),
            boundaries: boundaries.to_vec(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a value (milliseconds)
    pub fn observe(&self, value: f64) {
        let bucket_idx = self
            .boundaries
            .iter()
            .position(|&boundary| value <= boundary)
            .unwrap_or(self.boundaries.len());

        self.buckets[bucket_idx].fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((value * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative `(le, count)` pairs, ending with `+Inf`.
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0u64;
        let mut result = Vec::with_capacity(self.buckets.len());

        for (i, &boundary) in self.boundaries.iter().enumerate() {
            cumulative += self.buckets[i].load(Ordering::Relaxed);
            result.push((boundary, cumulative));
        }

        cumulative += self.buckets[self.boundaries.len()].load(Ordering::Relaxed);
        result.push((f64::INFINITY, cumulative));

        result
    }

    pub fn sum(&self) -> f64 {
        self.sum_micros.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct EndpointMetrics {
    pub requests_total: Counter,
    pub requests_error: Counter,
    pub latency: Histogram,
}

/// Registry shared by the coordinators and the HTTP layer.
#[derive(Debug)]
pub struct MetricsRegistry {
    endpoints: Mutex<BTreeMap<String, Arc<EndpointMetrics>>>,
    replica_failures: Mutex<BTreeMap<String, u64>>,

    pub writes_committed: Counter,
    pub writes_failed: Counter,
    pub reads_agreed: Counter,
    pub reads_failed: Counter,

    start_time: Instant,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            endpoints: Mutex::new(BTreeMap::new()),
            replica_failures: Mutex::new(BTreeMap::new()),
            writes_committed: Counter::new(),
            writes_failed: Counter::new(),
            reads_agreed: Counter::new(),
            reads_failed: Counter::new(),
            start_time: Instant::now(),
        }
    }

    /// Get or create metrics for an endpoint
    pub fn endpoint(&self, path: &str) -> Arc<EndpointMetrics> {
        lock(&self.endpoints)
            .entry(path.to_string())
            .or_default()
            .clone()
    }

    pub fn record_request(&self, path: &str, duration: Duration, success: bool) {
        let endpoint = self.endpoint(path);
        endpoint.requests_total.inc();
        endpoint.latency.observe(duration.as_secs_f64() * 1000.0);
        if !success {
            endpoint.requests_error.inc();
        }
    }

    pub fn record_replica_failure(&self, replica: &str) {
        *lock(&self.replica_failures)
            .entry(replica.to_string())
            .or_insert(0) += 1;
    }

    pub fn replica_failures(&self, replica: &str) -> u64 {
        lock(&self.replica_failures)
            .get(replica)
            .copied()
            .unwrap_or(0)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-compatible metrics output
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        for (name, help, counter) in [
            (
                "leaderless_writes_committed_total",
                "Writes that reached write quorum",
                &self.writes_committed,
            ),
            (
                "leaderless_writes_failed_total",
                "Writes that missed write quorum",
                &self.writes_failed,
            ),
            (
                "leaderless_reads_agreed_total",
                "Reads whose value reached the read threshold",
                &self.reads_agreed,
            ),
            (
                "leaderless_reads_failed_total",
                "Reads without agreement or aborted by a replica",
                &self.reads_failed,
            ),
        ] {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} counter", name);
            let _ = writeln!(out, "{} {}", name, counter.get());
        }

        out.push_str("# HELP leaderless_replica_failures_total Per-replica statement failures\n");
        out.push_str("# TYPE leaderless_replica_failures_total counter\n");
        for (replica, count) in lock(&self.replica_failures).iter() {
            let _ = writeln!(
                out,
                "leaderless_replica_failures_total{{replica=\"{}\"}} {}",
                replica, count
            );
        }

        out.push_str("# HELP leaderless_uptime_seconds Server uptime in seconds\n");
        out.push_str("# TYPE leaderless_uptime_seconds gauge\n");
        let _ = writeln!(out, "leaderless_uptime_seconds {}", self.uptime_seconds());

        let endpoints = lock(&self.endpoints);

        out.push_str("# HELP leaderless_endpoint_requests_total Requests per endpoint\n");
        out.push_str("# TYPE leaderless_endpoint_requests_total counter\n");
        for (path, metrics) in endpoints.iter() {
            let _ = writeln!(
                out,
                "leaderless_endpoint_requests_total{{path=\"{}\"}} {}",
                path,
                metrics.requests_total.get()
            );
        }

        out.push_str("# HELP leaderless_endpoint_errors_total Errors per endpoint\n");
        out.push_str("# TYPE leaderless_endpoint_errors_total counter\n");
        for (path, metrics) in endpoints.iter() {
            let _ = writeln!(
                out,
                "leaderless_endpoint_errors_total{{path=\"{}\"}} {}",
                path,
                metrics.requests_error.get()
            );
        }

        out.push_str("# HELP leaderless_request_duration_ms Request duration in milliseconds\n");
        out.push_str("# TYPE leaderless_request_duration_ms histogram\n");
        for (path, metrics) in endpoints.iter() {
            for (le, count) in metrics.latency.get_buckets() {
                let le = if le.is_infinite() {
                    "+Inf".to_string()
                } else {
                    le.to_string()
                };
                let _ = writeln!(
                    out,
                    "leaderless_request_duration_ms_bucket{{path=\"{}\",le=\"{}\"}} {}",
                    path, le, count
                );
            }
            let _ = writeln!(
                out,
                "leaderless_request_duration_ms_sum{{path=\"{}\"}} {}",
                path,
                metrics.latency.sum()
            );
            let _ = writeln!(
                out,
                "leaderless_request_duration_ms_count{{path=\"{}\"}} {}",
                path,
                metrics.latency.count()
            );
        }

        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram() {
        let hist = Histogram::new();

        hist.observe(5.0);
        hist.observe(50.0);
        hist.observe(50_000.0);

        assert_eq!(hist.count(), 3);
        let buckets = hist.get_buckets();
        assert_eq!(buckets.len(), LATENCY_BUCKETS.len() + 1);
        assert_eq!(buckets[1], (5.0, 1));
        assert_eq!(buckets.last().unwrap().1, 3);
        assert!((hist.sum() - 50_055.0).abs() < 1e-6);
    }

    #[test]
    fn test_replica_failures() {
        let registry = MetricsRegistry::new();
        registry.record_replica_failure("db-1:5432");
        registry.record_replica_failure("db-1:5432");
        assert_eq!(registry.replica_failures("db-1:5432"), 2);
        assert_eq!(registry.replica_failures("db-0:5432"), 0);
    }

    #[test]
    fn test_prometheus_output() {
        let registry = MetricsRegistry::new();
        registry.writes_committed.inc();
        registry.reads_failed.inc();
        registry.record_replica_failure("db-2:5432");
        registry.record_request("/api", Duration::from_millis(12), true);
        registry.record_request("/api", Duration::from_millis(40), false);

        let out = registry.to_prometheus();
        assert!(out.contains("leaderless_writes_committed_total 1"));
        assert!(out.contains("leaderless_reads_failed_total 1"));
        assert!(out.contains("leaderless_replica_failures_total{replica=\"db-2:5432\"} 1"));
        assert!(out.contains("leaderless_endpoint_requests_total{path=\"/api\"} 2"));
        assert!(out.contains("leaderless_endpoint_errors_total{path=\"/api\"} 1"));
        assert!(out.contains("le=\"+Inf\"} 2"));
    }
}
