//! Episode builder (short-term memory).
//!
//! Groups admitted items into episodes by shared category within a
//! co-activation window, computes decay/salience/co-activation metrics,
//! and flags episodes that are ready for consolidation.
//!
//! Processing is strictly incremental: only items newer than the stage
//! watermark (or whose content hash changed) are considered, and item ids
//! are deduplicated so replaying the same input is a no-op.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;

use crate::config::EpisodeConfig;
use crate::traits::Features;
use crate::types::{content_hash, Episode, MemoryItem, WatermarkRecord};

/// A memory item paired with its enrichment features. The enrichment call
/// itself happens upstream (with timeout/retry/fallback); the builder is
/// pure.
#[derive(Debug, Clone)]
pub struct EnrichedItem {
    pub item: MemoryItem,
    pub features: Features,
}

/// Builds episodes from the admitted active set.
pub struct EpisodeBuilder {
    config: EpisodeConfig,
    /// Item ids already grouped, for idempotent re-processing within the
    /// builder's lifetime. Cross-run idempotence comes from the watermark
    /// plus keyed upserts.
    seen_items: HashSet<String>,
}

impl EpisodeBuilder {
    /// Create a builder from config.
    pub fn new(config: EpisodeConfig) -> Self {
        Self {
            config,
            seen_items: HashSet::new(),
        }
    }

    /// Deterministic episode id from category and window start, so
    /// re-building the same group upserts rather than duplicates.
    fn episode_id(category: &str, window_start: DateTime<Utc>) -> String {
        let key = format!("{}|{}", category, window_start.timestamp_millis());
        format!("ep-{}", content_hash(&key))
    }

    /// Group watermark-selected items into episodes.
    ///
    /// Items are processed in `created_at` ascending order. A new episode
    /// opens per category whenever an item falls outside the current
    /// co-activation window for that category.
    pub fn build_episodes(
        &mut self,
        items: Vec<EnrichedItem>,
        watermark: &WatermarkRecord,
        now: DateTime<Utc>,
    ) -> Vec<Episode> {
        let window = Duration::seconds(self.config.coactivation_window_secs);

        let mut selected: Vec<EnrichedItem> = items
            .into_iter()
            .filter(|e| watermark.selects(e.item.created_at, &content_hash(&e.item.content_ref)))
            .filter(|e| !self.seen_items.contains(&e.item.id))
            .collect();
        selected.sort_by_key(|e| e.item.created_at);

        let mut episodes: Vec<Episode> = Vec::new();
        for enriched in selected {
            self.seen_items.insert(enriched.item.id.clone());
            let category = enriched.features.primary_category();
            let created = enriched.item.created_at;

            let blend = self.salience_blend(&enriched.features);
            let open = episodes
                .iter()
                .rposition(|ep| ep.category == category && created - ep.window_start <= window);

            match open {
                Some(idx) => {
                    let episode = &mut episodes[idx];
                    episode.add_item(&enriched.item.id);
                    if created > episode.window_end {
                        episode.window_end = created;
                    }
                    // Running mean of the member salience blend.
                    let n = episode.item_ids.len() as f64;
                    episode.emotional_salience =
                        (episode.emotional_salience * (n - 1.0) + blend) / n;
                }
                None => {
                    let mut episode =
                        Episode::new(Self::episode_id(&category, created), category, created, created);
                    episode.add_item(&enriched.item.id);
                    episode.emotional_salience = blend;
                    episodes.push(episode);
                }
            }
        }

        for episode in &mut episodes {
            self.refresh_strength(episode, now);
        }

        tracing::debug!(episodes = episodes.len(), "episode build pass");
        episodes
    }

    /// Weighted blend of sentiment and importance, clamped to [0, 1].
    fn salience_blend(&self, features: &Features) -> f64 {
        (self.config.sentiment_weight * features.sentiment
            + self.config.importance_weight * features.importance)
            .clamp(0.0, 1.0)
    }

    /// Recompute recency decay and short-term strength for an episode.
    pub fn refresh_strength(&self, episode: &mut Episode, now: DateTime<Utc>) {
        let age_seconds = (now - episode.window_end).num_milliseconds() as f64 / 1000.0;
        let age_seconds = age_seconds.max(0.0);
        episode.recency_factor = (-age_seconds / self.config.stm_decay_constant_secs).exp();
        episode.set_strength(episode.recency_factor * episode.emotional_salience);
    }

    /// Count deduplicated co-activations with same-category episodes in
    /// the rolling window, capped, and update consolidation readiness.
    ///
    /// `neighbors` is the set of already-persisted episodes the new ones
    /// can co-activate with; the new episodes also co-activate with each
    /// other.
    pub fn update_coactivation(&self, episodes: &mut [Episode], neighbors: &[Episode]) {
        let window = Duration::seconds(self.config.hebbian_window_secs);

        for i in 0..episodes.len() {
            let mut coactivated: HashSet<String> = HashSet::new();
            let midpoint = episodes[i].window_midpoint();
            let category = episodes[i].category.clone();
            let own_id = episodes[i].id.clone();

            for other in neighbors.iter().chain(episodes.iter()) {
                if other.id == own_id || other.category != category {
                    continue;
                }
                let gap = (other.window_midpoint() - midpoint).num_seconds().abs();
                if gap <= window.num_seconds() {
                    coactivated.insert(other.id.clone());
                }
            }

            let episode = &mut episodes[i];
            episode.hebbian_potential =
                (coactivated.len() as u32).min(self.config.hebbian_cap);
            self.evaluate_readiness(episode);
        }
    }

    /// An episode becomes consolidation-ready once its hebbian potential
    /// reaches the configured minimum and its emotional salience clears
    /// the floor.
    pub fn evaluate_readiness(&self, episode: &mut Episode) {
        episode.ready_for_consolidation = episode.hebbian_potential
            >= self.config.min_coactivations
            && episode.emotional_salience > self.config.salience_floor;
    }
}
