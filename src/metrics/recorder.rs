//! Metrics recorder for storage engine operations

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize metric descriptions (call once at startup)
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return; // Already initialized
    }

    // Operation counters
    describe_counter!(
        "filenest_operations_started_total",
        "Uploads, downloads and deletions started"
    );
    describe_counter!(
        "filenest_operations_completed_total",
        "Uploads, downloads and deletions completed successfully"
    );
    describe_counter!(
        "filenest_operations_failed_total",
        "Uploads, downloads and deletions that failed"
    );
    describe_counter!(
        "filenest_bytes_total",
        "File bytes uploaded or downloaded"
    );

    // Replication and integrity
    describe_counter!(
        "filenest_replica_write_failures_total",
        "Replica writes that failed or timed out"
    );
    describe_counter!(
        "filenest_replica_read_fallbacks_total",
        "Chunk reads served by a replica other than the first candidate"
    );
    describe_counter!(
        "filenest_chunks_under_replicated_total",
        "Chunks committed with fewer replicas than requested"
    );
    describe_counter!(
        "filenest_corruption_events_total",
        "Checksum mismatches detected at chunk or file level"
    );
    describe_counter!(
        "filenest_cleanup_failures_total",
        "Best-effort blob removals that failed"
    );

    // Gauges
    describe_gauge!(
        "filenest_active_operations",
        "Operations currently in flight"
    );

    // Histograms
    describe_histogram!(
        "filenest_operation_duration_seconds",
        "Duration of uploads, downloads and deletions"
    );
    describe_histogram!(
        "filenest_replica_write_duration_seconds",
        "Time to write one replica"
    );
}

// ============== Replica Operations ==============

/// Record a replica write failing on a node
pub fn record_replica_write_failed(node_id: &str, reason: &str) {
    counter!("filenest_replica_write_failures_total", "node_id" => node_id.to_string(), "reason" => reason.to_string()).increment(1);
}

/// Record replica write duration
pub fn record_replica_write_duration(duration: Duration) {
    histogram!("filenest_replica_write_duration_seconds").record(duration.as_secs_f64());
}

/// Record a chunk read that had to skip its first candidate replica
pub fn record_replica_fallback() {
    counter!("filenest_replica_read_fallbacks_total").increment(1);
}

/// Record a chunk committed below the requested replication factor
pub fn record_under_replicated(succeeded: usize, requested: usize) {
    counter!("filenest_chunks_under_replicated_total", "missing" => (requested - succeeded.min(requested)).to_string()).increment(1);
}

/// Record a checksum mismatch; `scope` is `chunk` or `file`
pub fn record_corruption(scope: &'static str) {
    counter!("filenest_corruption_events_total", "scope" => scope).increment(1);
}

/// Record a swallowed cleanup failure
pub fn record_cleanup_failure() {
    counter!("filenest_cleanup_failures_total").increment(1);
}

// ============== Engine Operations ==============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Upload,
    Download,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Upload => "upload",
            Operation::Download => "download",
            Operation::Delete => "delete",
        }
    }
}

/// Helper struct to time an engine operation and record its outcome
pub struct OperationMetrics {
    operation: Operation,
    start_time: Instant,
    bytes: u64,
}

impl OperationMetrics {
    /// Start tracking a new operation
    pub fn start(operation: Operation) -> Self {
        counter!("filenest_operations_started_total", "operation" => operation.as_str())
            .increment(1);
        gauge!("filenest_active_operations", "operation" => operation.as_str()).increment(1.0);

        Self {
            operation,
            start_time: Instant::now(),
            bytes: 0,
        }
    }

    /// Record bytes moved
    pub fn add_bytes(&mut self, bytes: u64) {
        self.bytes += bytes;
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Mark operation as complete
    pub fn complete(self) {
        let op = self.operation.as_str();
        counter!("filenest_operations_completed_total", "operation" => op).increment(1);
        gauge!("filenest_active_operations", "operation" => op).decrement(1.0);
        counter!("filenest_bytes_total", "operation" => op).increment(self.bytes);
        histogram!("filenest_operation_duration_seconds", "operation" => op)
            .record(self.start_time.elapsed().as_secs_f64());
    }

    /// Mark operation as failed
    pub fn fail(self, reason: &'static str) {
        let op = self.operation.as_str();
        counter!("filenest_operations_failed_total", "operation" => op, "reason" => reason)
            .increment(1);
        gauge!("filenest_active_operations", "operation" => op).decrement(1.0);
    }

    /// Get current duration
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}
