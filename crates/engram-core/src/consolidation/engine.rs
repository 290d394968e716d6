//! Replay-based consolidation engine.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::consolidation::{Association, AssociationGraph};
use crate::error::EngramResult;
use crate::retry::call_with_retry;
use crate::traits::{EnrichmentProvider, PairSampler};
use crate::types::{content_hash, ConsolidatedMemory, Episode, EpisodeState};

/// Weakened episodes below this strength are discarded for good.
const DISCARD_FLOOR: f64 = 0.05;

/// Hebbian strengthening rule.
///
/// `new = old * (1 + learning_rate * pre * post)`, clamped to [0, 1].
/// The clamp prevents runaway potentiation when an episode keeps
/// co-activating.
pub fn hebbian_update(old: f64, learning_rate: f64, pre: f64, post: f64) -> f64 {
    (old * (1.0 + learning_rate * pre * post)).clamp(0.0, 1.0)
}

/// Counters and outputs of one consolidation cycle.
#[derive(Debug, Default)]
pub struct CycleOutcome {
    /// Episodes replayed this cycle.
    pub replayed: usize,
    /// Episodes that came out of replay strengthened.
    pub strengthened: usize,
    /// Episodes that came out of replay weakened.
    pub weakened: usize,
    /// Episodes promoted to long-term storage this cycle.
    pub promoted: Vec<ConsolidatedMemory>,
    /// Ids of episodes discarded this cycle.
    pub discarded: Vec<String>,
    /// Association edges added or updated this cycle.
    pub associations_added: usize,
}

/// Consolidation engine: replays ready episodes, applies Hebbian
/// strengthening and competitive forgetting, and promotes strong episodes
/// into consolidated memories.
///
/// One engine instance is a single writer: episode ids are claimed for
/// the duration of a cycle so no episode is ever processed by two
/// concurrent cycles. Cross-process exclusion comes from the stage run
/// lock.
pub struct ConsolidationEngine {
    config: PipelineConfig,
    enrichment: Option<Arc<dyn EnrichmentProvider>>,
    sampler: Box<dyn PairSampler>,
    graph: AssociationGraph,
    in_flight: HashSet<String>,
}

impl ConsolidationEngine {
    /// Create an engine. `enrichment` is optional: without it, replay
    /// still strengthens episodes but produces no weighted associations.
    pub fn new(
        config: PipelineConfig,
        enrichment: Option<Arc<dyn EnrichmentProvider>>,
        sampler: Box<dyn PairSampler>,
    ) -> Self {
        Self {
            config,
            enrichment,
            sampler,
            graph: AssociationGraph::new(),
            in_flight: HashSet::new(),
        }
    }

    /// The association graph accumulated so far.
    pub fn graph(&self) -> &AssociationGraph {
        &self.graph
    }

    /// Related episodes for replay: same category, or adjacent in time
    /// within the configured window. Terminal episodes never participate.
    fn related_ids(&self, episode: &Episode, all: &[Episode]) -> Vec<String> {
        let adjacency = self.config.consolidation.adjacency_window_secs;
        all.iter()
            .filter(|other| other.id != episode.id && !other.state.is_terminal())
            .filter(|other| {
                other.category == episode.category
                    || (other.window_midpoint() - episode.window_midpoint())
                        .num_seconds()
                        .abs()
                        <= adjacency
            })
            .map(|other| other.id.clone())
            .collect()
    }

    /// Similarity weight from the enrichment collaborator, or None when
    /// the collaborator is absent or keeps failing. Absence is a
    /// documented degradation, not an error.
    async fn similarity_weight(&self, a: &str, b: &str) -> Option<f64> {
        let provider = self.enrichment.as_ref()?;
        let result = call_with_retry(&self.config.collaborators, "similarity", || {
            provider.similarity(a, b)
        })
        .await;
        match result {
            Ok(weight) => Some(weight.clamp(0.0, 1.0)),
            Err(err) => {
                tracing::warn!(from = a, to = b, error = %err, "similarity unavailable, dropping association");
                None
            }
        }
    }

    /// Replay one episode id against its related episodes, producing the
    /// weighted association list. Without a similarity collaborator the
    /// list is empty.
    async fn weigh_associations(&self, from: &str, targets: &[String]) -> Vec<Association> {
        if self.enrichment.is_none() {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(targets.len());
        for target in targets {
            if let Some(weight) = self.similarity_weight(from, target).await {
                out.push(Association {
                    from: from.to_string(),
                    to: target.clone(),
                    weight,
                });
            }
        }
        out
    }

    /// Normalized co-activation activity in [0, 1].
    fn activity(&self, potential: u32) -> f64 {
        let cap = self.config.episode.hebbian_cap.max(1) as f64;
        (potential as f64 / cap).min(1.0)
    }

    /// Run one bounded consolidation cycle over the given episodes.
    ///
    /// Episodes must arrive in `created_at` ascending order; the cycle
    /// processes at most `replay_batch_size` ready episodes and leaves
    /// the rest for the next cycle.
    pub async fn replay_cycle(
        &mut self,
        episodes: &mut [Episode],
        now: DateTime<Utc>,
    ) -> EngramResult<CycleOutcome> {
        let mut outcome = CycleOutcome::default();

        // Claim this cycle's batch. Terminal and unready episodes are
        // never selected, which is what makes promotion monotonic.
        let mut claimed: Vec<usize> = Vec::new();
        for (i, episode) in episodes.iter().enumerate() {
            if claimed.len() >= self.config.consolidation.replay_batch_size {
                break;
            }
            if episode.state != EpisodeState::Pending || !episode.ready_for_consolidation {
                continue;
            }
            if !self.in_flight.insert(episode.id.clone()) {
                continue; // already owned by a concurrent cycle
            }
            claimed.push(i);
        }

        // Gather replay inputs before mutating anything.
        struct ReplayInput {
            index: usize,
            id: String,
            related: Vec<String>,
            post_activity: f64,
        }
        let mut inputs: Vec<ReplayInput> = Vec::with_capacity(claimed.len());
        for &i in &claimed {
            let episode = &episodes[i];
            let related = self.related_ids(episode, episodes);
            let post_activity = if related.is_empty() {
                0.0
            } else {
                let sum: f64 = related
                    .iter()
                    .filter_map(|id| episodes.iter().find(|e| e.id == *id))
                    .map(|e| self.activity(e.hebbian_potential))
                    .sum();
                sum / related.len() as f64
            };
            inputs.push(ReplayInput {
                index: i,
                id: episode.id.clone(),
                related,
                post_activity,
            });
        }

        for input in inputs {
            let episode = &mut episodes[input.index];
            if episode.transition_to(EpisodeState::Replaying).is_err() {
                continue;
            }
            outcome.replayed += 1;

            let pre = self.activity(episode.hebbian_potential);
            let new_strength = hebbian_update(
                episode.strength,
                self.config.consolidation.learning_rate,
                pre,
                input.post_activity,
            );
            episode.set_strength(new_strength);

            let associations = self.weigh_associations(&input.id, &input.related).await;
            for assoc in &associations {
                self.graph.associate(&assoc.from, &assoc.to, assoc.weight);
            }
            outcome.associations_added += associations.len();

            let episode = &mut episodes[input.index];
            let next = if episode.strength >= self.config.consolidation.decay_threshold {
                outcome.strengthened += 1;
                EpisodeState::Strengthened
            } else {
                outcome.weakened += 1;
                EpisodeState::Weakened
            };
            // Legal by construction: Replaying admits both outcomes.
            let _ = episode.transition_to(next);
        }

        self.apply_competition(episodes);
        self.resolve_terminals(episodes, &mut outcome, now);
        self.sample_creative_pairs(episodes, &mut outcome).await;

        for id in claimed.iter().map(|&i| episodes[i].id.clone()).collect::<Vec<_>>() {
            self.in_flight.remove(&id);
        }

        tracing::info!(
            replayed = outcome.replayed,
            strengthened = outcome.strengthened,
            weakened = outcome.weakened,
            promoted = outcome.promoted.len(),
            discarded = outcome.discarded.len(),
            "consolidation cycle complete"
        );
        Ok(outcome)
    }

    /// Competitive forgetting: weak episodes decay harder, strong ones
    /// get a boost. Scales are fixed; thresholds come from config.
    fn apply_competition(&self, episodes: &mut [Episode]) {
        for episode in episodes.iter_mut() {
            if episode.state.is_terminal() {
                continue;
            }
            let strength = episode.strength;
            if strength < self.config.consolidation.decay_threshold {
                episode.set_strength(strength * 0.8);
            } else if strength > self.config.consolidation.strengthen_threshold {
                episode.set_strength(strength * 1.2);
            }
        }
    }

    /// Resolve post-replay states: promote strong strengthened episodes,
    /// discard hopeless weakened ones, return the rest to Pending for
    /// another cycle.
    fn resolve_terminals(
        &self,
        episodes: &mut [Episode],
        outcome: &mut CycleOutcome,
        _now: DateTime<Utc>,
    ) {
        for episode in episodes.iter_mut() {
            match episode.state {
                EpisodeState::Strengthened => {
                    if episode.strength > self.config.consolidation.promotion_threshold {
                        if episode.transition_to(EpisodeState::ConsolidatedToLtm).is_ok() {
                            outcome.promoted.push(ConsolidatedMemory::from_episode(
                                format!("cm-{}", content_hash(&episode.id)),
                                &episode.id,
                                &episode.category,
                                episode.strength,
                                episode.window_start,
                            ));
                        }
                    } else {
                        let _ = episode.transition_to(EpisodeState::Pending);
                    }
                }
                EpisodeState::Weakened => {
                    if episode.strength < DISCARD_FLOOR {
                        if episode.transition_to(EpisodeState::Discarded).is_ok() {
                            outcome.discarded.push(episode.id.clone());
                        }
                    } else {
                        let _ = episode.transition_to(EpisodeState::Pending);
                    }
                }
                _ => {}
            }
        }
    }

    /// Probe sampled episode pairs for non-obvious associations. The
    /// sampling strategy is pluggable; weights still come from the
    /// similarity collaborator, so without one this is a no-op.
    async fn sample_creative_pairs(&mut self, episodes: &[Episode], outcome: &mut CycleOutcome) {
        if self.enrichment.is_none() {
            return;
        }
        let ids: Vec<String> = episodes
            .iter()
            .filter(|e| !e.state.is_terminal())
            .map(|e| e.id.clone())
            .collect();
        let pairs = self
            .sampler
            .sample_pairs(&ids, self.config.consolidation.creative_pairs_per_cycle);
        for (a, b) in pairs {
            if let Some(weight) = self.similarity_weight(&a, &b).await {
                self.graph.associate(&a, &b, weight);
                outcome.associations_added += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngramError;
    use crate::traits::{Features, RandomPairSampler};
    use async_trait::async_trait;

    fn engine(enrichment: Option<Arc<dyn EnrichmentProvider>>) -> ConsolidationEngine {
        ConsolidationEngine::new(
            PipelineConfig::default(),
            enrichment,
            Box::new(RandomPairSampler::new(0)),
        )
    }

    fn ready_episode(id: &str, strength: f64, potential: u32) -> Episode {
        let now = Utc::now();
        let mut ep = Episode::new(id, "navigation", now - chrono::Duration::minutes(5), now);
        ep.set_strength(strength);
        ep.hebbian_potential = potential;
        ep.emotional_salience = 0.8;
        ep.ready_for_consolidation = true;
        ep
    }

    struct FixedSimilarity(f64);

    #[async_trait]
    impl EnrichmentProvider for FixedSimilarity {
        async fn enrich(&self, _content_ref: &str) -> EngramResult<Features> {
            Ok(Features::default())
        }
        async fn similarity(&self, _a: &str, _b: &str) -> EngramResult<f64> {
            Ok(self.0)
        }
        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct FailingSimilarity;

    #[async_trait]
    impl EnrichmentProvider for FailingSimilarity {
        async fn enrich(&self, _content_ref: &str) -> EngramResult<Features> {
            Err(EngramError::enrichment("down"))
        }
        async fn similarity(&self, _a: &str, _b: &str) -> EngramResult<f64> {
            Err(EngramError::enrichment("down"))
        }
        fn name(&self) -> &str {
            "failing"
        }
    }

    /// 0.6 * (1 + 0.1 * 0.8 * 0.5) = 0.624.
    #[test]
    fn test_hebbian_update_formula() {
        let result = hebbian_update(0.6, 0.1, 0.8, 0.5);
        assert!((result - 0.624).abs() < 1e-12);
    }

    #[test]
    fn test_hebbian_update_clamps_to_unit_interval() {
        assert_eq!(hebbian_update(0.99, 0.2, 1.0, 1.0), 1.0_f64.min(0.99 * 1.2));
        assert!(hebbian_update(1.0, 0.2, 1.0, 1.0) <= 1.0);
        assert!(hebbian_update(0.0, 0.2, 1.0, 1.0) >= 0.0);
    }

    #[test]
    fn test_competitive_forgetting_scales() {
        let engine = engine(None);
        let mut episodes = vec![
            ready_episode("weak", 0.2, 0),
            ready_episode("mid", 0.5, 0),
            ready_episode("strong", 0.8, 0),
        ];
        engine.apply_competition(&mut episodes);
        assert!((episodes[0].strength - 0.16).abs() < 1e-9);
        assert!((episodes[1].strength - 0.5).abs() < 1e-9);
        assert!((episodes[2].strength - 0.96).abs() < 1e-9);
    }

    #[test]
    fn test_competition_clamps_at_one() {
        let engine = engine(None);
        let mut episodes = vec![ready_episode("top", 0.95, 0)];
        engine.apply_competition(&mut episodes);
        assert_eq!(episodes[0].strength, 1.0);
    }

    #[tokio::test]
    async fn test_replay_without_collaborator_yields_no_associations() {
        let mut engine = engine(None);
        let mut episodes = vec![
            ready_episode("ep1", 0.6, 8),
            ready_episode("ep2", 0.6, 8),
        ];
        let outcome = engine.replay_cycle(&mut episodes, Utc::now()).await.unwrap();
        assert_eq!(outcome.replayed, 2);
        assert_eq!(outcome.associations_added, 0);
        assert_eq!(engine.graph().edge_count(), 0);
    }

    #[tokio::test]
    async fn test_replay_with_collaborator_builds_weighted_edges() {
        let mut engine = engine(Some(Arc::new(FixedSimilarity(0.75))));
        let mut episodes = vec![
            ready_episode("ep1", 0.6, 8),
            ready_episode("ep2", 0.6, 8),
        ];
        let outcome = engine.replay_cycle(&mut episodes, Utc::now()).await.unwrap();
        assert!(outcome.associations_added >= 2);
        let edges = engine.graph().associations_of("ep1");
        assert!(!edges.is_empty());
        assert!((edges[0].weight - 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failing_collaborator_degrades_to_empty_list() {
        let mut config = PipelineConfig::default();
        config.collaborators.max_retries = 0;
        config.collaborators.backoff_initial_ms = 1;
        let mut engine = ConsolidationEngine::new(
            config,
            Some(Arc::new(FailingSimilarity)),
            Box::new(RandomPairSampler::new(0)),
        );
        let mut episodes = vec![
            ready_episode("ep1", 0.6, 8),
            ready_episode("ep2", 0.6, 8),
        ];
        let outcome = engine.replay_cycle(&mut episodes, Utc::now()).await.unwrap();
        assert_eq!(outcome.replayed, 2);
        assert_eq!(outcome.associations_added, 0);
    }

    #[tokio::test]
    async fn test_strong_episodes_promote_and_stay_terminal() {
        let mut engine = engine(None);
        let mut episodes = vec![ready_episode("ep1", 0.9, 16), ready_episode("ep2", 0.9, 16)];
        let outcome = engine.replay_cycle(&mut episodes, Utc::now()).await.unwrap();
        assert_eq!(outcome.promoted.len(), 2);
        assert!(episodes.iter().all(|e| e.state == EpisodeState::ConsolidatedToLtm));

        // A second cycle must not touch them: promotion is monotonic.
        let second = engine.replay_cycle(&mut episodes, Utc::now()).await.unwrap();
        assert_eq!(second.replayed, 0);
        assert!(second.promoted.is_empty());
        assert!(episodes.iter().all(|e| e.state == EpisodeState::ConsolidatedToLtm));
    }

    #[tokio::test]
    async fn test_hopeless_episodes_are_discarded() {
        let mut engine = engine(None);
        let mut episodes = vec![ready_episode("ep1", 0.05, 0)];
        // Repeated cycles: 0.05 decays by 0.8 each round until the floor.
        for _ in 0..8 {
            engine.replay_cycle(&mut episodes, Utc::now()).await.unwrap();
            episodes[0].ready_for_consolidation = true;
        }
        assert_eq!(episodes[0].state, EpisodeState::Discarded);
    }

    #[tokio::test]
    async fn test_batch_bound_is_respected() {
        let mut config = PipelineConfig::default();
        config.consolidation.replay_batch_size = 3;
        let mut engine = ConsolidationEngine::new(
            config,
            None,
            Box::new(RandomPairSampler::new(0)),
        );
        let mut episodes: Vec<Episode> =
            (0..10).map(|i| ready_episode(&format!("ep{}", i), 0.5, 4)).collect();
        let outcome = engine.replay_cycle(&mut episodes, Utc::now()).await.unwrap();
        assert_eq!(outcome.replayed, 3);
    }

    #[tokio::test]
    async fn test_strengths_stay_in_unit_interval_across_cycles() {
        let mut engine = engine(None);
        let mut episodes: Vec<Episode> = (0..6)
            .map(|i| ready_episode(&format!("ep{}", i), 0.1 + 0.15 * i as f64, 20))
            .collect();
        for _ in 0..5 {
            engine.replay_cycle(&mut episodes, Utc::now()).await.unwrap();
            for episode in &mut episodes {
                assert!((0.0..=1.0).contains(&episode.strength), "strength {} out of range", episode.strength);
                if episode.state == EpisodeState::Pending {
                    episode.ready_for_consolidation = true;
                }
            }
        }
    }
}
