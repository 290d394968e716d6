//! Configuration for the consolidation pipeline.
//!
//! One immutable [`PipelineConfig`] is supplied at job start and validated
//! before any record is processed. There is no mid-batch reconfiguration:
//! jobs capture the config by reference for their whole run.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{EngramError, EngramResult};

/// Attention gate settings (working memory).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttentionConfig {
    /// Base capacity of the active set. Miller's 7.
    pub base_capacity: usize,
    /// Maximum +/- variance applied to the base per admission cycle.
    pub capacity_variance: usize,
    /// Hard lower bound on the active set size.
    pub min_capacity: usize,
    /// Hard upper bound on the active set size.
    pub max_capacity: usize,
    /// Time constant for admission recency decay, in seconds.
    pub recency_decay_secs: f64,
    /// Seed for the capacity-variance RNG. Same seed + same inputs gives
    /// byte-identical admission results.
    pub rng_seed: u64,
}

impl Default for AttentionConfig {
    fn default() -> Self {
        Self {
            base_capacity: 7,
            capacity_variance: 2,
            min_capacity: 5,
            max_capacity: 9,
            recency_decay_secs: 300.0,
            rng_seed: 0,
        }
    }
}

/// Episode builder settings (short-term memory).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EpisodeConfig {
    /// Co-activation grouping window, in seconds.
    pub coactivation_window_secs: i64,
    /// Rolling window for counting co-activations between same-category
    /// episodes, in seconds. Wider than the grouping window: episodes of
    /// one category are at least a grouping window apart by construction.
    pub hebbian_window_secs: i64,
    /// Time constant for short-term recency decay, in seconds. Source
    /// material disagrees on this value (30 vs 1800), so it is exposed
    /// here rather than hard-coded.
    pub stm_decay_constant_secs: f64,
    /// Weight of the sentiment input in emotional salience.
    pub sentiment_weight: f64,
    /// Weight of the importance input in emotional salience.
    pub importance_weight: f64,
    /// Cap on the deduplicated co-activation count.
    pub hebbian_cap: u32,
    /// Minimum hebbian potential before an episode is consolidation-ready.
    pub min_coactivations: u32,
    /// Emotional salience must exceed this for consolidation readiness.
    pub salience_floor: f64,
}

impl Default for EpisodeConfig {
    fn default() -> Self {
        Self {
            coactivation_window_secs: 300,
            hebbian_window_secs: 3600,
            stm_decay_constant_secs: 1800.0,
            sentiment_weight: 0.5,
            importance_weight: 0.5,
            hebbian_cap: 32,
            min_coactivations: 3,
            salience_floor: 0.5,
        }
    }
}

/// Consolidation engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    /// Hebbian learning rate. Valid range [0.05, 0.2]; values outside it
    /// fail validation rather than being silently clamped.
    pub learning_rate: f64,
    /// Strength below this is scaled down each forgetting cycle.
    pub decay_threshold: f64,
    /// Strength above this is scaled up each forgetting cycle.
    pub strengthen_threshold: f64,
    /// Strength above this promotes the episode to long-term storage.
    /// Source material disagrees on the default (0.5 vs 0.6); exposed as
    /// configuration.
    pub promotion_threshold: f64,
    /// Maximum episodes replayed per cycle.
    pub replay_batch_size: usize,
    /// Window for "adjacent in time" during replay, in seconds.
    pub adjacency_window_secs: i64,
    /// Number of creative association pairs sampled per cycle.
    pub creative_pairs_per_cycle: usize,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            decay_threshold: 0.3,
            strengthen_threshold: 0.7,
            promotion_threshold: 0.6,
            replay_batch_size: 100,
            adjacency_window_secs: 3600,
            creative_pairs_per_cycle: 8,
        }
    }
}

/// Semantic network builder settings (long-term memory).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticConfig {
    /// Number of fixed clusters.
    pub cluster_count: u32,
    /// Retrieval strength weight on consolidated strength.
    pub strength_weight: f64,
    /// Retrieval strength weight on inverse competition rank.
    pub rank_weight: f64,
    /// Retrieval strength weight on log access frequency.
    pub frequency_weight: f64,
    /// Retrieval strength weight on age recency.
    pub age_weight: f64,
    /// Time constant for the age term, in seconds.
    pub age_decay_constant_secs: f64,
    /// Nodes below this retrieval strength, and remote in age, are pruned.
    pub pruning_threshold: f64,
    /// Rolling access frequency at which a node starts consolidating.
    pub consolidating_access_threshold: u32,
    /// Rolling access frequency at which a node counts as schematized.
    pub schematized_access_threshold: u32,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            cluster_count: 1000,
            strength_weight: 0.3,
            rank_weight: 0.2,
            frequency_weight: 0.2,
            age_weight: 0.3,
            age_decay_constant_secs: 2_592_000.0, // 30 days
            pruning_threshold: 0.01,
            consolidating_access_threshold: 3,
            schematized_access_threshold: 10,
        }
    }
}

/// Incremental write-back settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WritebackConfig {
    /// Records per transaction.
    pub batch_size: usize,
    /// Floor the batch size halves down to before the stage fails.
    pub min_batch_size: usize,
    /// Consecutive runs a record may be quarantined before it is moved to
    /// the dead-letter list.
    pub max_quarantine_runs: u32,
}

impl Default for WritebackConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            min_batch_size: 50,
            max_quarantine_runs: 3,
        }
    }
}

/// External collaborator call settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaboratorConfig {
    /// Per-call timeout, in seconds.
    pub timeout_secs: u64,
    /// Bounded retries before falling back.
    pub max_retries: usize,
    /// Initial backoff delay, in milliseconds.
    pub backoff_initial_ms: u64,
    /// Backoff ceiling, in milliseconds.
    pub backoff_max_ms: u64,
    /// Bound on the enrichment/embedding response cache.
    pub cache_entries: usize,
    /// TTL for cached collaborator responses, in seconds.
    pub cache_ttl_secs: i64,
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
            backoff_initial_ms: 100,
            backoff_max_ms: 10_000,
            cache_entries: 1024,
            cache_ttl_secs: 600,
        }
    }
}

/// Durable store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the SQLite database.
    pub db_path: PathBuf,
    /// Maximum pooled connections.
    pub pool_size: usize,
    /// How long a caller blocks on pool exhaustion before erroring, in
    /// seconds.
    pub pool_wait_timeout_secs: u64,
    /// TTL for stage run locks, in seconds. A crashed holder's lock
    /// expires after this and cannot deadlock future runs.
    pub run_lock_ttl_secs: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let engram_dir = dirs::home_dir()
            .map(|h| h.join(".engram"))
            .unwrap_or_else(|| PathBuf::from(".engram"));
        Self {
            db_path: engram_dir.join("pipeline.db"),
            pool_size: 4,
            pool_wait_timeout_secs: 30,
            run_lock_ttl_secs: 600,
        }
    }
}

/// Complete, immutable pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub attention: AttentionConfig,
    pub episode: EpisodeConfig,
    pub consolidation: ConsolidationConfig,
    pub semantic: SemanticConfig,
    pub writeback: WritebackConfig,
    pub collaborators: CollaboratorConfig,
    pub store: StoreConfig,
}

fn check_unit(name: &str, value: f64) -> EngramResult<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(EngramError::Configuration(format!(
            "{} must be in [0, 1], got {}",
            name, value
        )));
    }
    Ok(())
}

impl PipelineConfig {
    /// Validate the configuration. Fatal before any record is processed.
    pub fn validate(&self) -> EngramResult<()> {
        let a = &self.attention;
        if a.min_capacity < 5 || a.max_capacity > 9 || a.min_capacity > a.max_capacity {
            return Err(EngramError::Configuration(format!(
                "capacity bounds [{}, {}] must sit inside [5, 9]",
                a.min_capacity, a.max_capacity
            )));
        }
        if a.base_capacity < a.min_capacity || a.base_capacity > a.max_capacity {
            return Err(EngramError::Configuration(format!(
                "base capacity {} outside [{}, {}]",
                a.base_capacity, a.min_capacity, a.max_capacity
            )));
        }
        if a.recency_decay_secs <= 0.0 {
            return Err(EngramError::Configuration(
                "recency_decay_secs must be positive".to_string(),
            ));
        }

        let e = &self.episode;
        if e.coactivation_window_secs <= 0 {
            return Err(EngramError::Configuration(
                "coactivation_window_secs must be positive".to_string(),
            ));
        }
        if e.hebbian_window_secs < e.coactivation_window_secs {
            return Err(EngramError::Configuration(
                "hebbian_window_secs must be at least the grouping window".to_string(),
            ));
        }
        if e.stm_decay_constant_secs <= 0.0 {
            return Err(EngramError::Configuration(
                "stm_decay_constant_secs must be positive".to_string(),
            ));
        }
        check_unit("sentiment_weight", e.sentiment_weight)?;
        check_unit("importance_weight", e.importance_weight)?;
        check_unit("salience_floor", e.salience_floor)?;
        let blend = e.sentiment_weight + e.importance_weight;
        if (blend - 1.0).abs() > 1e-6 {
            return Err(EngramError::Configuration(format!(
                "salience blend weights must sum to 1, got {}",
                blend
            )));
        }

        let c = &self.consolidation;
        if !(0.05..=0.2).contains(&c.learning_rate) {
            return Err(EngramError::Configuration(format!(
                "learning_rate must be in [0.05, 0.2], got {}",
                c.learning_rate
            )));
        }
        check_unit("decay_threshold", c.decay_threshold)?;
        check_unit("strengthen_threshold", c.strengthen_threshold)?;
        check_unit("promotion_threshold", c.promotion_threshold)?;
        if c.decay_threshold >= c.strengthen_threshold {
            return Err(EngramError::Configuration(
                "decay_threshold must be below strengthen_threshold".to_string(),
            ));
        }
        if c.replay_batch_size == 0 {
            return Err(EngramError::Configuration(
                "replay_batch_size must be positive".to_string(),
            ));
        }

        let s = &self.semantic;
        if s.cluster_count == 0 {
            return Err(EngramError::Configuration(
                "cluster_count must be positive".to_string(),
            ));
        }
        let weight_sum =
            s.strength_weight + s.rank_weight + s.frequency_weight + s.age_weight;
        if (weight_sum - 1.0).abs() > 1e-6 {
            return Err(EngramError::Configuration(format!(
                "retrieval strength weights must sum to 1, got {}",
                weight_sum
            )));
        }
        check_unit("pruning_threshold", s.pruning_threshold)?;
        if s.age_decay_constant_secs <= 0.0 {
            return Err(EngramError::Configuration(
                "age_decay_constant_secs must be positive".to_string(),
            ));
        }

        let w = &self.writeback;
        if w.min_batch_size == 0 || w.batch_size < w.min_batch_size {
            return Err(EngramError::Configuration(format!(
                "batch_size {} must be at least min_batch_size {} (and both positive)",
                w.batch_size, w.min_batch_size
            )));
        }

        if self.store.pool_size == 0 {
            return Err(EngramError::Configuration(
                "pool_size must be positive".to_string(),
            ));
        }
        if self.store.run_lock_ttl_secs <= 0 {
            return Err(EngramError::Configuration(
                "run_lock_ttl_secs must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Load configuration from a file (TOML, JSON, or YAML by extension).
    pub fn from_file(path: impl AsRef<std::path::Path>) -> EngramResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let ext = path.as_ref().extension().and_then(|e| e.to_str());

        let config: Self = match ext {
            Some("toml") => toml::from_str(&content)
                .map_err(|e| EngramError::Configuration(e.to_string()))?,
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| EngramError::Configuration(e.to_string()))?,
            Some("yaml" | "yml") => serde_yaml::from_str(&content)
                .map_err(|e| EngramError::Configuration(e.to_string()))?,
            _ => {
                return Err(EngramError::Configuration(
                    "Unsupported config file format. Use .toml, .json, or .yaml".to_string(),
                ))
            }
        };
        config.validate()?;
        Ok(config)
    }
}
