//! Metrics observer interface and export for pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Fire-and-forget observer of pool activity.
///
/// Every method has a no-op default so implementors only override what they
/// care about. Recording must be cheap and must never fail: the pool calls
/// these from its hot paths.
pub trait MetricsRecorder: Send + Sync {
    /// A resource was allocated; `latency` is the allocator round-trip time.
    fn record_allocation_success_and_latency(&self, _latency: Duration) {}

    /// An allocation attempt failed after `latency`.
    fn record_allocation_failure_and_latency(&self, _latency: Duration) {}

    /// A released resource went back into the idle set.
    fn record_recycled(&self) {}

    /// The release handler ran for `latency`.
    fn record_reset_latency(&self, _latency: Duration) {}

    /// The destroy pipeline ran for `latency`.
    fn record_destroy_latency(&self, _latency: Duration) {}

    /// An acquire went through the central pending queue (affinity engine).
    fn record_slow_path(&self) {}

    /// An acquire was served from the caller's own sub-pool (affinity engine).
    fn record_fast_path(&self) {}
}

/// Recorder that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsRecorder;

impl MetricsRecorder for NoopMetricsRecorder {}

/// Atomic counter-backed recorder, suitable for tests and for feeding the
/// Prometheus exporter.
///
/// # Examples
///
/// ```
/// use flowpool::{InMemoryMetricsRecorder, MetricsRecorder};
///
/// let recorder = InMemoryMetricsRecorder::new();
/// recorder.record_recycled();
/// recorder.record_fast_path();
///
/// assert_eq!(recorder.recycled_count(), 1);
/// assert_eq!(recorder.fast_path_count(), 1);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryMetricsRecorder {
    allocation_success: AtomicU64,
    allocation_failure: AtomicU64,
    allocation_nanos: AtomicU64,
    recycled: AtomicU64,
    reset_count: AtomicU64,
    reset_nanos: AtomicU64,
    destroy_count: AtomicU64,
    destroy_nanos: AtomicU64,
    slow_path: AtomicU64,
    fast_path: AtomicU64,
}

impl InMemoryMetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocation_success_count(&self) -> u64 {
        self.allocation_success.load(Ordering::Relaxed)
    }

    pub fn allocation_failure_count(&self) -> u64 {
        self.allocation_failure.load(Ordering::Relaxed)
    }

    pub fn recycled_count(&self) -> u64 {
        self.recycled.load(Ordering::Relaxed)
    }

    pub fn reset_count(&self) -> u64 {
        self.reset_count.load(Ordering::Relaxed)
    }

    pub fn destroy_count(&self) -> u64 {
        self.destroy_count.load(Ordering::Relaxed)
    }

    pub fn slow_path_count(&self) -> u64 {
        self.slow_path.load(Ordering::Relaxed)
    }

    pub fn fast_path_count(&self) -> u64 {
        self.fast_path.load(Ordering::Relaxed)
    }

    /// Take a point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> PoolMetrics {
        let allocations =
            self.allocation_success_count() + self.allocation_failure_count();
        PoolMetrics {
            allocation_success_count: self.allocation_success_count(),
            allocation_failure_count: self.allocation_failure_count(),
            recycled_count: self.recycled_count(),
            slow_path_count: self.slow_path_count(),
            fast_path_count: self.fast_path_count(),
            mean_allocation_latency: mean_latency(
                self.allocation_nanos.load(Ordering::Relaxed),
                allocations,
            ),
            mean_reset_latency: mean_latency(
                self.reset_nanos.load(Ordering::Relaxed),
                self.reset_count(),
            ),
            mean_destroy_latency: mean_latency(
                self.destroy_nanos.load(Ordering::Relaxed),
                self.destroy_count(),
            ),
        }
    }
}

fn mean_latency(total_nanos: u64, count: u64) -> Duration {
    if count == 0 {
        Duration::ZERO
    } else {
        Duration::from_nanos(total_nanos / count)
    }
}

impl MetricsRecorder for InMemoryMetricsRecorder {
    fn record_allocation_success_and_latency(&self, latency: Duration) {
        self.allocation_success.fetch_add(1, Ordering::Relaxed);
        self.allocation_nanos
            .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
    }

    fn record_allocation_failure_and_latency(&self, latency: Duration) {
        self.allocation_failure.fetch_add(1, Ordering::Relaxed);
        self.allocation_nanos
            .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
    }

    fn record_recycled(&self) {
        self.recycled.fetch_add(1, Ordering::Relaxed);
    }

    fn record_reset_latency(&self, latency: Duration) {
        self.reset_count.fetch_add(1, Ordering::Relaxed);
        self.reset_nanos
            .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
    }

    fn record_destroy_latency(&self, latency: Duration) {
        self.destroy_count.fetch_add(1, Ordering::Relaxed);
        self.destroy_nanos
            .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
    }

    fn record_slow_path(&self) {
        self.slow_path.fetch_add(1, Ordering::Relaxed);
    }

    fn record_fast_path(&self) {
        self.fast_path.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of pool counters
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Successful allocations since pool creation
    pub allocation_success_count: u64,

    /// Failed allocations since pool creation
    pub allocation_failure_count: u64,

    /// Resources returned to the idle set
    pub recycled_count: u64,

    /// Acquisitions routed through the central pending queue
    pub slow_path_count: u64,

    /// Acquisitions served from a per-thread sub-pool
    pub fast_path_count: u64,

    /// Mean allocator round-trip time
    pub mean_allocation_latency: Duration,

    /// Mean release-handler time
    pub mean_reset_latency: Duration,

    /// Mean destroy-pipeline time
    pub mean_destroy_latency: Duration,
}

impl PoolMetrics {
    /// Export counters as a flat string map.
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert(
            "allocation_success_count".to_string(),
            self.allocation_success_count.to_string(),
        );
        metrics.insert(
            "allocation_failure_count".to_string(),
            self.allocation_failure_count.to_string(),
        );
        metrics.insert("recycled_count".to_string(), self.recycled_count.to_string());
        metrics.insert("slow_path_count".to_string(), self.slow_path_count.to_string());
        metrics.insert("fast_path_count".to_string(), self.fast_path_count.to_string());
        metrics.insert(
            "mean_allocation_latency_us".to_string(),
            self.mean_allocation_latency.as_micros().to_string(),
        );
        metrics.insert(
            "mean_reset_latency_us".to_string(),
            self.mean_reset_latency.as_micros().to_string(),
        );
        metrics.insert(
            "mean_destroy_latency_us".to_string(),
            self.mean_destroy_latency.as_micros().to_string(),
        );
        metrics
    }
}

/// Metrics exporter for Prometheus format
pub struct MetricsExporter;

impl MetricsExporter {
    /// Export a snapshot in Prometheus exposition format.
    ///
    /// # Examples
    ///
    /// ```
    /// use flowpool::{InMemoryMetricsRecorder, MetricsExporter, MetricsRecorder};
    ///
    /// let recorder = InMemoryMetricsRecorder::new();
    /// recorder.record_recycled();
    ///
    /// let output = MetricsExporter::export_prometheus(&recorder.snapshot(), "db_pool", None);
    /// assert!(output.contains("flowpool_recycled_total"));
    /// assert!(output.contains("pool=\"db_pool\""));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        let mut output = String::new();
        let labels = Self::format_labels(pool_name, tags);

        output.push_str("# HELP flowpool_allocations_success_total Successful resource allocations\n");
        output.push_str("# TYPE flowpool_allocations_success_total counter\n");
        output.push_str(&format!(
            "flowpool_allocations_success_total{{{}}} {}\n",
            labels, metrics.allocation_success_count
        ));

        output.push_str("# HELP flowpool_allocations_failure_total Failed resource allocations\n");
        output.push_str("# TYPE flowpool_allocations_failure_total counter\n");
        output.push_str(&format!(
            "flowpool_allocations_failure_total{{{}}} {}\n",
            labels, metrics.allocation_failure_count
        ));

        output.push_str("# HELP flowpool_recycled_total Resources returned to the idle set\n");
        output.push_str("# TYPE flowpool_recycled_total counter\n");
        output.push_str(&format!(
            "flowpool_recycled_total{{{}}} {}\n",
            labels, metrics.recycled_count
        ));

        output.push_str("# HELP flowpool_slow_path_total Acquisitions through the pending queue\n");
        output.push_str("# TYPE flowpool_slow_path_total counter\n");
        output.push_str(&format!(
            "flowpool_slow_path_total{{{}}} {}\n",
            labels, metrics.slow_path_count
        ));

        output.push_str("# HELP flowpool_fast_path_total Acquisitions served thread-locally\n");
        output.push_str("# TYPE flowpool_fast_path_total counter\n");
        output.push_str(&format!(
            "flowpool_fast_path_total{{{}}} {}\n",
            labels, metrics.fast_path_count
        ));

        output.push_str("# HELP flowpool_allocation_latency_seconds Mean allocator latency\n");
        output.push_str("# TYPE flowpool_allocation_latency_seconds gauge\n");
        output.push_str(&format!(
            "flowpool_allocation_latency_seconds{{{}}} {:.6}\n",
            labels,
            metrics.mean_allocation_latency.as_secs_f64()
        ));

        output
    }

    fn format_labels(pool_name: &str, tags: Option<&HashMap<String, String>>) -> String {
        let mut labels = vec![format!("pool=\"{}\"", pool_name)];

        if let Some(tags) = tags {
            for (key, value) in tags {
                labels.push(format!("{}=\"{}\"", key, value));
            }
        }

        labels.join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let recorder = InMemoryMetricsRecorder::new();
        recorder.record_allocation_success_and_latency(Duration::from_millis(4));
        recorder.record_allocation_success_and_latency(Duration::from_millis(2));
        recorder.record_allocation_failure_and_latency(Duration::from_millis(6));
        recorder.record_recycled();
        recorder.record_slow_path();
        recorder.record_slow_path();

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.allocation_success_count, 2);
        assert_eq!(snapshot.allocation_failure_count, 1);
        assert_eq!(snapshot.recycled_count, 1);
        assert_eq!(snapshot.slow_path_count, 2);
        assert_eq!(snapshot.mean_allocation_latency, Duration::from_millis(4));
    }

    #[test]
    fn mean_latency_of_nothing_is_zero() {
        let snapshot = InMemoryMetricsRecorder::new().snapshot();
        assert_eq!(snapshot.mean_reset_latency, Duration::ZERO);
    }

    #[test]
    fn prometheus_export_includes_tags() {
        let recorder = InMemoryMetricsRecorder::new();
        recorder.record_fast_path();

        let mut tags = HashMap::new();
        tags.insert("service".to_string(), "api".to_string());

        let output =
            MetricsExporter::export_prometheus(&recorder.snapshot(), "my_pool", Some(&tags));
        assert!(output.contains("flowpool_fast_path_total"));
        assert!(output.contains("pool=\"my_pool\""));
        assert!(output.contains("service=\"api\""));
    }

    #[test]
    fn export_is_flat_string_map() {
        let recorder = InMemoryMetricsRecorder::new();
        recorder.record_recycled();
        let exported = recorder.snapshot().export();
        assert_eq!(exported.get("recycled_count").map(String::as_str), Some("1"));
    }
}
