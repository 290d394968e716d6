//! Observability collaborator.

use serde::{Deserialize, Serialize};

use crate::types::Stage;

/// Structured per-batch metrics emitted after every batch commit or
/// rollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchMetrics {
    /// Stage the batch belongs to.
    pub stage: Stage,
    /// Records attempted in this batch.
    pub processed: usize,
    /// Records committed.
    pub succeeded: usize,
    /// Records that failed or were quarantined.
    pub failed: usize,
    /// Batch size in effect (may have been halved by retries).
    pub batch_size: usize,
    /// Wall-clock duration of the batch, in milliseconds.
    pub duration_ms: i64,
}

/// Sink for structured batch metrics.
///
/// Implementations must be fire-and-forget: the pipeline never blocks on
/// the sink's presence, so `record_batch` takes `&self` and returns
/// nothing. Slow backends buffer internally.
pub trait MetricsSink: Send + Sync {
    /// Record one batch result.
    fn record_batch(&self, metrics: &BatchMetrics);
}

/// Sink that drops everything. The default when no collaborator is wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn record_batch(&self, _metrics: &BatchMetrics) {}
}

/// Sink that emits metrics as structured tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn record_batch(&self, metrics: &BatchMetrics) {
        tracing::info!(
            stage = %metrics.stage,
            processed = metrics.processed,
            succeeded = metrics.succeeded,
            failed = metrics.failed,
            batch_size = metrics.batch_size,
            duration_ms = metrics.duration_ms,
            "batch complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_sink_accepts_metrics() {
        let sink = NoopSink;
        sink.record_batch(&BatchMetrics {
            stage: Stage::Episode,
            processed: 10,
            succeeded: 9,
            failed: 1,
            batch_size: 1000,
            duration_ms: 12,
        });
    }
}
