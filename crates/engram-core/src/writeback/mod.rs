//! Incremental write-back.
//!
//! Persists a stage's output in fixed-size batches, one transaction per
//! batch. A failed batch rolls back and retries at half the size, down
//! to a floor. At the floor, a persistent transient failure is fatal for
//! the stage; an integrity failure switches to per-record isolation so
//! the offending record is quarantined and every valid record still
//! commits. Upserts are keyed by stable id, so re-applying any batch
//! after a crash is a no-op.

use chrono::{DateTime, Utc};

use crate::config::WritebackConfig;
use crate::error::EngramResult;
use crate::store::{PipelineStore, StoreRecord, WritebackTable};
use crate::traits::{BatchMetrics, MetricsSink};
use crate::types::Stage;

/// Result of one write-back run.
#[derive(Debug, Default)]
pub struct WritebackOutcome {
    /// Records attempted.
    pub processed: usize,
    /// Records committed.
    pub succeeded: usize,
    /// Record ids quarantined this run.
    pub quarantined: Vec<String>,
    /// Record ids escalated to the dead-letter list this run.
    pub escalated: Vec<String>,
    /// Batches committed (including per-record isolation commits).
    pub batches: usize,
    /// Newest `created_at` among committed records; feeds the stage
    /// watermark.
    pub max_created_at: Option<DateTime<Utc>>,
    /// Content hash of that newest record; feeds the stage watermark.
    pub content_hash: String,
}

/// Write-back job for one stage's output.
pub struct WritebackJob<'a> {
    store: &'a PipelineStore,
    config: &'a WritebackConfig,
    metrics: &'a dyn MetricsSink,
    stage: Stage,
}

impl<'a> WritebackJob<'a> {
    /// Create a job bound to a stage.
    pub fn new(
        store: &'a PipelineStore,
        config: &'a WritebackConfig,
        metrics: &'a dyn MetricsSink,
        stage: Stage,
    ) -> Self {
        Self {
            store,
            config,
            metrics,
            stage,
        }
    }

    /// Write all records to the given table.
    pub async fn run(
        &self,
        table: WritebackTable,
        records: Vec<StoreRecord>,
    ) -> EngramResult<WritebackOutcome> {
        let mut outcome = WritebackOutcome {
            processed: records.len(),
            ..Default::default()
        };
        let mut batch_size = self.config.batch_size;
        let mut position = 0;

        while position < records.len() {
            let end = (position + batch_size).min(records.len());
            let chunk = &records[position..end];
            let started = Utc::now();

            match self.store.upsert_batch(table, chunk.to_vec()).await {
                Ok(written) => {
                    outcome.succeeded += written;
                    outcome.batches += 1;
                    commit_bookkeeping(&mut outcome, chunk);
                    self.emit(chunk.len(), written, 0, batch_size, started);
                    position = end;
                }
                Err(err) if batch_size > self.config.min_batch_size => {
                    self.emit(chunk.len(), 0, chunk.len(), batch_size, started);
                    batch_size = (batch_size / 2).max(self.config.min_batch_size);
                    tracing::warn!(
                        stage = %self.stage,
                        error = %err,
                        batch_size,
                        "batch rolled back, halving and retrying"
                    );
                }
                Err(err) if err.is_transient() => {
                    // Still failing at the floor and the store itself is
                    // unhealthy: fatal for this stage.
                    self.emit(chunk.len(), 0, chunk.len(), batch_size, started);
                    return Err(err);
                }
                Err(_) => {
                    // Floor-size batch with an integrity problem inside:
                    // isolate per record so one bad record cannot block
                    // its batch.
                    let isolated = self.isolate_records(table, chunk, &mut outcome).await?;
                    self.emit(chunk.len(), isolated, chunk.len() - isolated, batch_size, started);
                    position = end;
                }
            }
        }

        Ok(outcome)
    }

    /// Apply a floor-size chunk record by record. Failing records are
    /// quarantined (and possibly escalated); the rest commit.
    async fn isolate_records(
        &self,
        table: WritebackTable,
        chunk: &[StoreRecord],
        outcome: &mut WritebackOutcome,
    ) -> EngramResult<usize> {
        let mut committed = 0;
        for record in chunk {
            let id = record.id();
            match self.store.upsert_batch(table, vec![record.clone()]).await {
                Ok(_) => {
                    committed += 1;
                    outcome.succeeded += 1;
                    outcome.batches += 1;
                    commit_bookkeeping(outcome, std::slice::from_ref(record));
                    self.store.clear_quarantine(self.stage, id).await?;
                }
                Err(err) if err.is_transient() => return Err(err),
                Err(err) => {
                    tracing::warn!(stage = %self.stage, record_id = %id, error = %err, "record quarantined");
                    let escalated = self
                        .store
                        .quarantine_record(
                            self.stage,
                            id.clone(),
                            err.to_string(),
                            self.config.max_quarantine_runs,
                        )
                        .await?;
                    if escalated {
                        outcome.escalated.push(id.clone());
                    }
                    outcome.quarantined.push(id);
                }
            }
        }
        Ok(committed)
    }

    fn emit(
        &self,
        processed: usize,
        succeeded: usize,
        failed: usize,
        batch_size: usize,
        started: DateTime<Utc>,
    ) {
        self.metrics.record_batch(&BatchMetrics {
            stage: self.stage,
            processed,
            succeeded,
            failed,
            batch_size,
            duration_ms: (Utc::now() - started).num_milliseconds(),
        });
    }
}

/// Track the newest committed record and its content hash for the stage
/// watermark.
fn commit_bookkeeping(outcome: &mut WritebackOutcome, chunk: &[StoreRecord]) {
    for record in chunk {
        let at = record.created_at();
        if outcome.max_created_at.map_or(true, |current| at > current) {
            outcome.max_created_at = Some(at);
            outcome.content_hash = PipelineStore::record_hash(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::NoopSink;
    use crate::types::{MemoryItem, MemoryStage};
    use std::sync::Mutex;

    struct CollectingSink {
        batches: Mutex<Vec<BatchMetrics>>,
    }

    impl CollectingSink {
        fn new() -> Self {
            Self {
                batches: Mutex::new(Vec::new()),
            }
        }
    }

    impl MetricsSink for CollectingSink {
        fn record_batch(&self, metrics: &BatchMetrics) {
            self.batches.lock().unwrap().push(metrics.clone());
        }
    }

    fn item(id: &str) -> MemoryItem {
        MemoryItem::new(id, format!("ref://{}", id), Utc::now())
    }

    fn config() -> WritebackConfig {
        WritebackConfig::default()
    }

    #[tokio::test]
    async fn test_clean_run_commits_everything() {
        let store = PipelineStore::open_in_memory().await.unwrap();
        let config = config();
        let sink = NoopSink;
        let job = WritebackJob::new(&store, &config, &sink, Stage::Attention);

        let records: Vec<StoreRecord> =
            (0..10).map(|i| StoreRecord::Item(item(&format!("m{}", i)))).collect();
        let outcome = job.run(WritebackTable::Items, records).await.unwrap();
        assert_eq!(outcome.processed, 10);
        assert_eq!(outcome.succeeded, 10);
        assert!(outcome.quarantined.is_empty());
        assert!(outcome.max_created_at.is_some());
    }

    #[tokio::test]
    async fn test_reapplying_a_batch_is_a_noop() {
        let store = PipelineStore::open_in_memory().await.unwrap();
        let config = config();
        let sink = NoopSink;
        let job = WritebackJob::new(&store, &config, &sink, Stage::Attention);

        let records: Vec<StoreRecord> =
            (0..20).map(|i| StoreRecord::Item(item(&format!("m{}", i)))).collect();
        job.run(WritebackTable::Items, records.clone()).await.unwrap();
        let first = store.items_in_stage(MemoryStage::Incoming).await.unwrap();

        job.run(WritebackTable::Items, records).await.unwrap();
        let second = store.items_in_stage(MemoryStage::Incoming).await.unwrap();

        assert_eq!(first.len(), 20);
        assert_eq!(second.len(), 20);
        let ids = |items: &[MemoryItem]| -> Vec<String> {
            items.iter().map(|i| i.id.clone()).collect()
        };
        assert_eq!(ids(&first), ids(&second));
    }

    /// A constraint violation at record #501 of 1000: the full batch
    /// rolls back, retries proceed at 500 and below, every valid record
    /// eventually commits, and #501 alone is quarantined.
    #[tokio::test]
    async fn test_poisoned_batch_halves_isolates_and_quarantines() {
        let store = PipelineStore::open_in_memory().await.unwrap();
        let config = config();
        let sink = CollectingSink::new();
        let job = WritebackJob::new(&store, &config, &sink, Stage::Attention);

        let mut records: Vec<StoreRecord> = Vec::with_capacity(1000);
        for i in 0..1000 {
            let mut it = item(&format!("m{:04}", i));
            if i == 500 {
                it.strength = 1.5; // violates the store's CHECK constraint
            }
            records.push(StoreRecord::Item(it));
        }

        let outcome = job.run(WritebackTable::Items, records).await.unwrap();
        assert_eq!(outcome.processed, 1000);
        assert_eq!(outcome.succeeded, 999);
        assert_eq!(outcome.quarantined, vec!["m0500".to_string()]);

        let stored = store.items_in_stage(MemoryStage::Incoming).await.unwrap();
        assert_eq!(stored.len(), 999);
        assert!(!stored.iter().any(|i| i.id == "m0500"));

        // The first failed attempt ran at the full batch size; a later
        // retry ran at 500.
        let batches = sink.batches.lock().unwrap();
        assert!(batches.iter().any(|b| b.batch_size == 1000 && b.failed > 0));
        assert!(batches.iter().any(|b| b.batch_size == 500 && b.succeeded == 500));
    }

    #[tokio::test]
    async fn test_repeated_quarantine_escalates_to_dead_letters() {
        let store = PipelineStore::open_in_memory().await.unwrap();
        let config = WritebackConfig {
            batch_size: 50,
            min_batch_size: 50,
            max_quarantine_runs: 2,
        };
        let sink = NoopSink;
        let job = WritebackJob::new(&store, &config, &sink, Stage::Attention);

        let mut bad = item("stuck");
        bad.strength = 2.0;
        let records = vec![StoreRecord::Item(bad)];

        let first = job.run(WritebackTable::Items, records.clone()).await.unwrap();
        assert_eq!(first.quarantined, vec!["stuck".to_string()]);
        assert!(first.escalated.is_empty());

        let second = job.run(WritebackTable::Items, records).await.unwrap();
        assert_eq!(second.escalated, vec!["stuck".to_string()]);
        assert_eq!(store.dead_letters(Stage::Attention).await.unwrap(), vec!["stuck"]);
    }

    #[tokio::test]
    async fn test_crash_resume_produces_no_gaps_or_duplicates() {
        let store = PipelineStore::open_in_memory().await.unwrap();
        let config = config();
        let sink = NoopSink;
        let job = WritebackJob::new(&store, &config, &sink, Stage::Attention);

        let records: Vec<StoreRecord> =
            (0..100).map(|i| StoreRecord::Item(item(&format!("m{:03}", i)))).collect();

        // Simulated crash: only the first 60 records made it before the
        // process died, and the watermark never advanced.
        job.run(WritebackTable::Items, records[..60].to_vec()).await.unwrap();

        // The re-run replays everything since the watermark.
        let outcome = job.run(WritebackTable::Items, records.clone()).await.unwrap();
        assert_eq!(outcome.succeeded, 100);

        let stored = store.items_in_stage(MemoryStage::Incoming).await.unwrap();
        assert_eq!(stored.len(), 100, "no gaps, no duplicates");
    }

    #[tokio::test]
    async fn test_metrics_emitted_per_batch() {
        let store = PipelineStore::open_in_memory().await.unwrap();
        let config = WritebackConfig {
            batch_size: 10,
            min_batch_size: 5,
            max_quarantine_runs: 3,
        };
        let sink = CollectingSink::new();
        let job = WritebackJob::new(&store, &config, &sink, Stage::Semantic);

        let records: Vec<StoreRecord> =
            (0..25).map(|i| StoreRecord::Item(item(&format!("m{}", i)))).collect();
        job.run(WritebackTable::Items, records).await.unwrap();

        let batches = sink.batches.lock().unwrap();
        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|b| b.stage == Stage::Semantic));
    }
}
