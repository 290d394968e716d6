//! Stage job runner.
//!
//! Each pipeline stage runs as an independently triggered batch job (the
//! trigger itself is owned by an external scheduler). A job:
//!
//! 1. takes the stage's TTL'd advisory run lock, exiting with a non-error
//!    `AlreadyRunning` status when another instance holds it;
//! 2. processes records in `created_at` ascending order, one pass per
//!    batch;
//! 3. writes its output through the incremental write-back path;
//! 4. advances the stage watermark only after a successful write, so a
//!    crashed or cancelled job resumes exactly where it left off;
//! 5. releases the lock and returns a structured [`RunReport`].
//!
//! Cancellation is checked only at batch boundaries, never mid-batch.

use chrono::Duration;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::attention::AttentionGate;
use crate::cache::ResponseCache;
use crate::config::PipelineConfig;
use crate::consolidation::ConsolidationEngine;
use crate::episode::{EnrichedItem, EpisodeBuilder};
use crate::error::{EngramError, EngramResult};
use crate::retry::call_with_retry;
use crate::semantic::SemanticNetworkBuilder;
use crate::store::{PipelineStore, StoreRecord, WritebackTable};
use crate::traits::{Embedder, EnrichmentProvider, Features, MetricsSink, PairSampler};
use crate::types::{MemoryItem, MemoryStage, RunReport, RunStatus, Stage, WatermarkRecord};
use crate::writeback::WritebackJob;

/// Shared cancellation flag, honored at batch boundaries.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create an unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The assembled pipeline: stage implementations wired to the durable
/// store and the external collaborators.
pub struct Pipeline {
    config: PipelineConfig,
    store: Arc<PipelineStore>,
    metrics: Arc<dyn MetricsSink>,
    enrichment: Option<Arc<dyn EnrichmentProvider>>,
    embedder: Option<Arc<dyn Embedder>>,
    gate: AttentionGate,
    builder: EpisodeBuilder,
    engine: ConsolidationEngine,
    semantic: SemanticNetworkBuilder,
    cancel: CancelFlag,
    /// Bounded TTL cache for enrichment responses. Owned by this
    /// pipeline instance, never process-global.
    feature_cache: std::sync::Mutex<ResponseCache<Features>>,
}

impl Pipeline {
    /// Assemble a pipeline. Configuration is validated here, before any
    /// record is processed; an invalid config is fatal.
    pub fn new(
        config: PipelineConfig,
        store: Arc<PipelineStore>,
        metrics: Arc<dyn MetricsSink>,
        enrichment: Option<Arc<dyn EnrichmentProvider>>,
        embedder: Option<Arc<dyn Embedder>>,
        sampler: Box<dyn PairSampler>,
    ) -> EngramResult<Self> {
        config.validate()?;
        let gate = AttentionGate::new(config.attention.clone());
        let builder = EpisodeBuilder::new(config.episode.clone());
        let engine = ConsolidationEngine::new(config.clone(), enrichment.clone(), sampler);
        let semantic = SemanticNetworkBuilder::new(config.semantic.clone());
        let feature_cache = std::sync::Mutex::new(ResponseCache::new(
            config.collaborators.cache_entries,
            Duration::seconds(config.collaborators.cache_ttl_secs),
        ));
        Ok(Self {
            config,
            store,
            metrics,
            enrichment,
            embedder,
            gate,
            builder,
            engine,
            semantic,
            cancel: CancelFlag::new(),
            feature_cache,
        })
    }

    /// Use a shared cancellation flag.
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// The durable store this pipeline writes through.
    pub fn store(&self) -> &PipelineStore {
        &self.store
    }

    fn lock_ttl(&self) -> Duration {
        Duration::seconds(self.config.store.run_lock_ttl_secs)
    }

    async fn acquire(&self, stage: Stage) -> EngramResult<bool> {
        self.store.acquire_run_lock(stage, self.lock_ttl()).await
    }

    /// Write one stage's output tables, advance the watermark, and fill
    /// in the report counters. Skips the watermark when cancelled so the
    /// next run resumes from the previous cursor.
    async fn write_stage_output(
        &self,
        stage: Stage,
        outputs: Vec<(WritebackTable, Vec<StoreRecord>)>,
        report: &mut RunReport,
    ) -> EngramResult<()> {
        let job = WritebackJob::new(
            &self.store,
            &self.config.writeback,
            self.metrics.as_ref(),
            stage,
        );
        let mut newest: Option<(chrono::DateTime<chrono::Utc>, String)> = None;
        for (table, records) in outputs {
            if self.cancel.is_cancelled() {
                tracing::info!(stage = %stage, "cancelled at batch boundary, watermark unchanged");
                return Ok(());
            }
            if records.is_empty() {
                continue;
            }
            let outcome = job.run(table, records).await?;
            report.records_processed += outcome.processed;
            report.records_quarantined += outcome.quarantined.len();
            for id in &outcome.quarantined {
                report.errors.push(format!("quarantined {}", id));
            }
            if let Some(at) = outcome.max_created_at {
                if newest.as_ref().map_or(true, |(n, _)| at > *n) {
                    newest = Some((at, outcome.content_hash));
                }
            }
        }
        if let Some((at, hash)) = newest {
            self.store.set_watermark(stage, at, hash).await?;
        }
        Ok(())
    }

    async fn finish(
        &self,
        stage: Stage,
        mut report: RunReport,
        result: EngramResult<()>,
    ) -> RunReport {
        if let Err(err) = self.store.release_run_lock(stage).await {
            report.errors.push(format!("lock release failed: {}", err));
        }
        match result {
            Ok(()) => report.complete(RunStatus::Completed),
            Err(err) => {
                report.errors.push(err.to_string());
                report.complete(RunStatus::Failed)
            }
        }
    }

    /// Attention gate job: admit incoming items into the bounded active
    /// set; evicted items stay pending for re-admission.
    pub async fn run_attention(&mut self, incoming: Vec<MemoryItem>) -> EngramResult<RunReport> {
        if !self.acquire(Stage::Attention).await? {
            return Ok(RunReport::already_running());
        }
        let mut report = RunReport::new();
        let result = self.attention_body(incoming, &mut report).await;
        Ok(self.finish(Stage::Attention, report, result).await)
    }

    async fn attention_body(
        &mut self,
        mut incoming: Vec<MemoryItem>,
        report: &mut RunReport,
    ) -> EngramResult<()> {
        incoming.sort_by_key(|item| item.created_at);
        // The previous active set and the persisted pending pool compete
        // alongside the new arrivals; losing an admission cycle moves an
        // item back to pending, never deletes it.
        let mut candidates = incoming;
        candidates.extend(self.store.items_in_stage(MemoryStage::Active).await?);
        candidates.extend(self.store.items_in_stage(MemoryStage::Pending).await?);
        let admission = self.gate.admit(candidates, chrono::Utc::now());
        let records: Vec<StoreRecord> = admission
            .admitted
            .into_iter()
            .chain(admission.evicted.into_iter())
            .map(StoreRecord::Item)
            .collect();
        self.write_stage_output(
            Stage::Attention,
            vec![(WritebackTable::Items, records)],
            report,
        )
        .await
    }

    /// Features for an item: the enrichment collaborator when it answers
    /// within its retry budget, otherwise a minimal fallback derived from
    /// the item's own salience inputs and source metadata.
    async fn features_for(&self, item: &MemoryItem) -> Features {
        if let Some(provider) = &self.enrichment {
            if let Some(cached) = self
                .feature_cache
                .lock()
                .expect("feature cache poisoned")
                .get(&item.content_ref)
            {
                return cached;
            }
            let result = call_with_retry(&self.config.collaborators, "enrich", || {
                provider.enrich(&item.content_ref)
            })
            .await;
            match result {
                Ok(features) => {
                    self.feature_cache
                        .lock()
                        .expect("feature cache poisoned")
                        .insert(item.content_ref.clone(), features.clone());
                    return features;
                }
                Err(err) => {
                    tracing::warn!(item = %item.id, error = %err, "enrichment unavailable, using fallback features");
                }
            }
        }
        let category = item
            .metadata
            .as_ref()
            .and_then(|m| m.get("category"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        Features {
            topics: category.into_iter().collect(),
            sentiment: item.sentiment,
            importance: item.importance,
            ..Default::default()
        }
    }

    /// Episode builder job: group active items into episodes and refresh
    /// co-activation counts.
    pub async fn run_episode_builder(&mut self) -> EngramResult<RunReport> {
        if !self.acquire(Stage::Episode).await? {
            return Ok(RunReport::already_running());
        }
        let mut report = RunReport::new();
        let result = self.episode_body(&mut report).await;
        Ok(self.finish(Stage::Episode, report, result).await)
    }

    async fn episode_body(&mut self, report: &mut RunReport) -> EngramResult<()> {
        let watermark = self
            .store
            .get_watermark(Stage::Episode)
            .await?
            .unwrap_or_else(|| WatermarkRecord::initial(Stage::Episode));

        let active = self.store.items_in_stage(MemoryStage::Active).await?;
        let mut by_id: std::collections::HashMap<String, MemoryItem> = active
            .iter()
            .map(|item| (item.id.clone(), item.clone()))
            .collect();
        let mut enriched = Vec::with_capacity(active.len());
        for item in active {
            let features = self.features_for(&item).await;
            enriched.push(EnrichedItem { item, features });
        }

        let now = chrono::Utc::now();
        let mut episodes = self.builder.build_episodes(enriched, &watermark, now);
        let neighbors = self.store.all_episodes().await?;
        self.builder.update_coactivation(&mut episodes, &neighbors);

        // Grouped items move to the episodic stage.
        let mut item_updates = Vec::new();
        for episode in &episodes {
            for item_id in &episode.item_ids {
                if let Some(mut item) = by_id.remove(item_id) {
                    item.stage = MemoryStage::Episodic;
                    item.coactivations = episode.hebbian_potential;
                    item_updates.push(StoreRecord::Item(item));
                }
            }
        }

        let episode_records: Vec<StoreRecord> =
            episodes.into_iter().map(StoreRecord::Episode).collect();
        self.write_stage_output(
            Stage::Episode,
            vec![
                (WritebackTable::Episodes, episode_records),
                (WritebackTable::Items, item_updates),
            ],
            report,
        )
        .await
    }

    /// Consolidation job: one bounded replay cycle over the stored
    /// episodes.
    pub async fn run_consolidation(&mut self) -> EngramResult<RunReport> {
        if !self.acquire(Stage::Consolidation).await? {
            return Ok(RunReport::already_running());
        }
        let mut report = RunReport::new();
        let result = self.consolidation_body(&mut report).await;
        Ok(self.finish(Stage::Consolidation, report, result).await)
    }

    async fn consolidation_body(&mut self, report: &mut RunReport) -> EngramResult<()> {
        let mut episodes = self.store.all_episodes().await?;
        let now = chrono::Utc::now();
        let outcome = self.engine.replay_cycle(&mut episodes, now).await?;

        let episode_records: Vec<StoreRecord> =
            episodes.into_iter().map(StoreRecord::Episode).collect();
        let consolidated_records: Vec<StoreRecord> = outcome
            .promoted
            .into_iter()
            .map(StoreRecord::Consolidated)
            .collect();
        let association_records: Vec<StoreRecord> = self
            .engine
            .graph()
            .edges()
            .into_iter()
            .map(StoreRecord::Association)
            .collect();

        self.write_stage_output(
            Stage::Consolidation,
            vec![
                (WritebackTable::Episodes, episode_records),
                (WritebackTable::Consolidated, consolidated_records),
                (WritebackTable::Associations, association_records),
            ],
            report,
        )
        .await
    }

    /// Semantic network job: promote new consolidated memories into
    /// nodes, re-rank cluster competition, refresh derived fields.
    pub async fn run_semantic(&mut self) -> EngramResult<RunReport> {
        if !self.acquire(Stage::Semantic).await? {
            return Ok(RunReport::already_running());
        }
        let mut report = RunReport::new();
        let result = self.semantic_body(&mut report).await;
        Ok(self.finish(Stage::Semantic, report, result).await)
    }

    async fn semantic_body(&mut self, report: &mut RunReport) -> EngramResult<()> {
        let memories = self.store.all_consolidated().await?;
        let mut nodes = self.store.all_semantic_nodes().await?;
        let now = chrono::Utc::now();

        for memory in &memories {
            if nodes.iter().any(|n| n.id == memory.id) {
                continue; // cluster assignment is sticky
            }
            let embedding = self.embedding_for(&memory.id).await;
            let node = self.semantic.promote(memory, embedding.as_deref(), now);
            nodes.push(node);
        }

        self.semantic.rank_and_refresh(&mut nodes, now);

        let node_records: Vec<StoreRecord> = nodes.into_iter().map(StoreRecord::Node).collect();
        self.write_stage_output(
            Stage::Semantic,
            vec![(WritebackTable::SemanticNodes, node_records)],
            report,
        )
        .await
    }

    async fn embedding_for(&self, id: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        let result = call_with_retry(&self.config.collaborators, "embed", || embedder.embed(id))
            .await;
        match result {
            Ok(vector) => Some(vector),
            Err(err) => {
                tracing::warn!(id, error = %err, "embedding unavailable, degrading to category clustering");
                None
            }
        }
    }

    /// Weekly homeostasis job: rescale every cluster around its mean and
    /// hard-delete remote nodes under the pruning threshold. Runs under
    /// the semantic stage lock.
    pub async fn run_homeostasis(&mut self) -> EngramResult<RunReport> {
        if !self.acquire(Stage::Semantic).await? {
            return Ok(RunReport::already_running());
        }
        let mut report = RunReport::new();
        let result = self.homeostasis_body(&mut report).await;
        Ok(self.finish(Stage::Semantic, report, result).await)
    }

    async fn homeostasis_body(&mut self, report: &mut RunReport) -> EngramResult<()> {
        let mut nodes = self.store.all_semantic_nodes().await?;
        let pruned = self.semantic.homeostatic_rescale(&mut nodes);
        if !pruned.is_empty() {
            self.store.delete_semantic_nodes(pruned).await?;
        }
        let node_records: Vec<StoreRecord> = nodes.into_iter().map(StoreRecord::Node).collect();
        self.write_stage_output(
            Stage::Semantic,
            vec![(WritebackTable::SemanticNodes, node_records)],
            report,
        )
        .await
    }

    /// Validate that a strength-bearing value is still in contract
    /// before it crosses a stage boundary. Clamps when safe; a value so
    /// far out that clamping would hide corruption is quarantined by the
    /// caller instead.
    pub fn guard_strength(value: f64, field: &str) -> EngramResult<f64> {
        if value.is_nan() {
            return Err(EngramError::invariant(field, value));
        }
        if !(0.0..=1.0).contains(&value) {
            tracing::warn!(field, value, "clamping out-of-contract strength");
        }
        Ok(value.clamp(0.0, 1.0))
    }
}
