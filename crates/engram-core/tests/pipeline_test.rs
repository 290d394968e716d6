//! Integration tests for the full consolidation pipeline.
//!
//! Drives items from the attention gate through episode building,
//! replay consolidation, and semantic network construction against an
//! in-memory store, and checks the pipeline-wide contracts: capacity
//! bounds, strength ranges, idempotent re-runs, monotonic promotion,
//! and run-lock exclusion.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use engram_core::error::EngramResult;
use engram_core::traits::{EnrichmentProvider, Features, NoopSink, RandomPairSampler};
use engram_core::{
    EpisodeState, MemoryItem, MemoryStage, Pipeline, PipelineConfig, PipelineStore, RunStatus,
    Stage,
};

/// Deterministic enrichment used across the integration tests: one
/// category, salience mirroring the request.
struct StaticEnrichment {
    topic: &'static str,
    similarity: f64,
}

#[async_trait]
impl EnrichmentProvider for StaticEnrichment {
    async fn enrich(&self, _content_ref: &str) -> EngramResult<Features> {
        Ok(Features {
            topics: vec![self.topic.to_string()],
            sentiment: 0.9,
            importance: 0.9,
            ..Default::default()
        })
    }

    async fn similarity(&self, _a: &str, _b: &str) -> EngramResult<f64> {
        Ok(self.similarity)
    }

    fn name(&self) -> &str {
        "static"
    }
}

fn items_in_windows(windows: usize, per_window: usize) -> Vec<MemoryItem> {
    let now = Utc::now();
    let mut items = Vec::new();
    for w in 0..windows {
        for i in 0..per_window {
            let created = now - Duration::seconds((w as i64) * 400 + (i as i64) * 10);
            items.push(
                MemoryItem::new(
                    format!("m-{}-{}", w, i),
                    format!("ref://episode-{}/{}", w, i),
                    created,
                )
                .with_sentiment(0.9)
                .with_importance(0.9),
            );
        }
    }
    items
}

async fn pipeline_with_enrichment(similarity: f64) -> Pipeline {
    let store = Arc::new(PipelineStore::open_in_memory().await.unwrap());
    // Fixed capacity at the top of Miller's range, so every seed item
    // below is admitted and episode contents stay predictable.
    let mut config = PipelineConfig::default();
    config.attention.base_capacity = 9;
    config.attention.capacity_variance = 0;
    Pipeline::new(
        config,
        store,
        Arc::new(NoopSink),
        Some(Arc::new(StaticEnrichment {
            topic: "work",
            similarity,
        })),
        None,
        Box::new(RandomPairSampler::new(7)),
    )
    .unwrap()
}

#[tokio::test]
async fn test_active_set_always_within_capacity_bounds() {
    let store = Arc::new(PipelineStore::open_in_memory().await.unwrap());
    let mut pipeline = Pipeline::new(
        PipelineConfig::default(),
        store,
        Arc::new(NoopSink),
        None,
        None,
        Box::new(RandomPairSampler::new(3)),
    )
    .unwrap();
    for round in 0..10 {
        let now = Utc::now();
        let incoming: Vec<MemoryItem> = (0..15)
            .map(|i| {
                MemoryItem::new(format!("r{}-m{}", round, i), format!("ref://{}", i), now)
                    .with_sentiment(0.8)
                    .with_importance(0.8)
            })
            .collect();
        let report = pipeline.run_attention(incoming).await.unwrap();
        assert_eq!(report.status, RunStatus::Completed);

        let active = pipeline.store().items_in_stage(MemoryStage::Active).await.unwrap();
        assert!(
            (5..=9).contains(&active.len()),
            "round {}: active set size {} outside [5, 9]",
            round,
            active.len()
        );
    }
}

#[tokio::test]
async fn test_pipeline_end_to_end_builds_semantic_network() {
    let mut pipeline = pipeline_with_enrichment(0.8).await;

    // Four bursts of the same category, spaced beyond the grouping
    // window, so each becomes its own episode and they co-activate.
    pipeline.run_attention(items_in_windows(4, 2)).await.unwrap();
    pipeline.run_episode_builder().await.unwrap();

    let episodes = pipeline.store().all_episodes().await.unwrap();
    assert_eq!(episodes.len(), 4, "one episode per burst");
    assert!(episodes.iter().all(|e| e.category == "work"));
    assert!(episodes.iter().all(|e| e.ready_for_consolidation));
    assert!(episodes.iter().all(|e| e.hebbian_potential >= 3));

    pipeline.run_consolidation().await.unwrap();
    let consolidated = pipeline.store().all_consolidated().await.unwrap();
    assert!(
        !consolidated.is_empty(),
        "strong recent episodes should promote"
    );
    let associations = pipeline.store().all_associations().await.unwrap();
    assert!(!associations.is_empty(), "similarity collaborator present");
    assert!(associations.iter().all(|a| (0.0..=1.0).contains(&a.weight)));

    pipeline.run_semantic().await.unwrap();
    let nodes = pipeline.store().all_semantic_nodes().await.unwrap();
    assert_eq!(nodes.len(), consolidated.len());
    for node in &nodes {
        assert!((0.0..=1.0).contains(&node.retrieval_strength));
        assert!(node.competition_rank >= 1);
        assert!(node.cluster_id < 1000);
    }

    // Same-cluster members carry distinct consecutive ranks.
    let mut by_cluster: HashMap<u32, Vec<u32>> = HashMap::new();
    for node in &nodes {
        by_cluster.entry(node.cluster_id).or_default().push(node.competition_rank);
    }
    for ranks in by_cluster.values_mut() {
        ranks.sort_unstable();
        let expected: Vec<u32> = (1..=ranks.len() as u32).collect();
        assert_eq!(*ranks, expected);
    }
}

#[tokio::test]
async fn test_rerunning_stages_is_idempotent() {
    let mut pipeline = pipeline_with_enrichment(0.8).await;
    pipeline.run_attention(items_in_windows(3, 2)).await.unwrap();

    pipeline.run_episode_builder().await.unwrap();
    let first = pipeline.store().all_episodes().await.unwrap();

    // Replaying the stage with no new input changes nothing.
    pipeline.run_episode_builder().await.unwrap();
    let second = pipeline.store().all_episodes().await.unwrap();
    assert_eq!(first.len(), second.len());
    let ids = |eps: &[engram_core::Episode]| {
        let mut v: Vec<String> = eps.iter().map(|e| e.id.clone()).collect();
        v.sort();
        v
    };
    assert_eq!(ids(&first), ids(&second));
}

#[tokio::test]
async fn test_promotion_is_monotonic_across_cycles() {
    let mut pipeline = pipeline_with_enrichment(0.8).await;
    pipeline.run_attention(items_in_windows(4, 2)).await.unwrap();
    pipeline.run_episode_builder().await.unwrap();
    pipeline.run_consolidation().await.unwrap();

    let promoted_ids: Vec<String> = pipeline
        .store()
        .all_episodes()
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.state == EpisodeState::ConsolidatedToLtm)
        .map(|e| e.id)
        .collect();
    assert!(!promoted_ids.is_empty());

    // Further cycles never pull a consolidated episode back.
    for _ in 0..3 {
        pipeline.run_consolidation().await.unwrap();
        let episodes = pipeline.store().all_episodes().await.unwrap();
        for id in &promoted_ids {
            let episode = episodes.iter().find(|e| e.id == *id).unwrap();
            assert_eq!(episode.state, EpisodeState::ConsolidatedToLtm);
        }
    }

    // And the consolidated set never shrinks or duplicates.
    let consolidated = pipeline.store().all_consolidated().await.unwrap();
    assert_eq!(consolidated.len(), promoted_ids.len());
}

#[tokio::test]
async fn test_all_persisted_strengths_stay_in_unit_interval() {
    let mut pipeline = pipeline_with_enrichment(0.6).await;
    for _ in 0..3 {
        pipeline.run_attention(items_in_windows(4, 2)).await.unwrap();
        pipeline.run_episode_builder().await.unwrap();
        pipeline.run_consolidation().await.unwrap();
        pipeline.run_semantic().await.unwrap();
    }

    let store = pipeline.store();
    for episode in store.all_episodes().await.unwrap() {
        assert!((0.0..=1.0).contains(&episode.strength));
        assert!((0.0..=1.0).contains(&episode.emotional_salience));
    }
    for memory in store.all_consolidated().await.unwrap() {
        assert!((0.0..=1.0).contains(&memory.consolidated_strength));
    }
    for node in store.all_semantic_nodes().await.unwrap() {
        assert!((0.0..=1.0).contains(&node.retrieval_strength));
        assert!((0.0..=1.0).contains(&node.consolidated_strength));
    }
}

#[tokio::test]
async fn test_run_lock_yields_already_running_not_error() {
    let store = Arc::new(PipelineStore::open_in_memory().await.unwrap());
    let mut pipeline = Pipeline::new(
        PipelineConfig::default(),
        store.clone(),
        Arc::new(NoopSink),
        None,
        None,
        Box::new(RandomPairSampler::new(0)),
    )
    .unwrap();

    store
        .acquire_run_lock(Stage::Consolidation, Duration::minutes(10))
        .await
        .unwrap();

    let report = pipeline.run_consolidation().await.unwrap();
    assert_eq!(report.status, RunStatus::AlreadyRunning);
    assert!(report.errors.is_empty());

    // Other stages keep running concurrently.
    let report = pipeline.run_attention(Vec::new()).await.unwrap();
    assert_eq!(report.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_watermark_advances_only_after_successful_write() {
    let mut pipeline = pipeline_with_enrichment(0.5).await;
    assert!(pipeline.store().get_watermark(Stage::Attention).await.unwrap().is_none());

    pipeline.run_attention(items_in_windows(1, 3)).await.unwrap();
    let watermark = pipeline
        .store()
        .get_watermark(Stage::Attention)
        .await
        .unwrap()
        .expect("watermark set after successful write");
    assert!(!watermark.content_hash.is_empty());
}
