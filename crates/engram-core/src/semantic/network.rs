//! Semantic network construction and retrieval-strength scoring.

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use std::collections::HashMap;

use crate::config::SemanticConfig;
use crate::semantic::{category_cluster, feature_vector, AdaptiveClusterer};
use crate::types::{AgeCategory, ConsolidatedMemory, SchematizationState, SemanticNode};

/// Pure retrieval-strength function.
///
/// `w1*strength + w2*(1/(rank+1)) + w3*ln(freq+1) + w4*exp(-age/tau)`,
/// clamped to [0, 1]. Every input is a persisted field, so the score is
/// re-derivable bit-for-bit from stored state.
pub fn retrieval_strength(
    config: &SemanticConfig,
    consolidated_strength: f64,
    competition_rank: u32,
    access_frequency: u32,
    age_seconds: f64,
) -> f64 {
    let rank_term = 1.0 / (competition_rank as f64 + 1.0);
    let frequency_term = (access_frequency as f64 + 1.0).ln();
    let age_term = (-age_seconds / config.age_decay_constant_secs).exp();

    (config.strength_weight * consolidated_strength
        + config.rank_weight * rank_term
        + config.frequency_weight * frequency_term
        + config.age_weight * age_term)
        .clamp(0.0, 1.0)
}

/// Builds and maintains the long-term semantic network.
pub struct SemanticNetworkBuilder {
    config: SemanticConfig,
    clusterer: AdaptiveClusterer,
}

impl SemanticNetworkBuilder {
    /// Create a builder from config.
    pub fn new(config: SemanticConfig) -> Self {
        let clusterer = AdaptiveClusterer::new(config.cluster_count);
        Self { config, clusterer }
    }

    /// Promote a consolidated memory into a semantic node.
    ///
    /// With an embedding the node is placed by nearest-centroid
    /// assignment; without one, placement degrades to the deterministic
    /// category cluster. The assignment is sticky: nothing moves the node
    /// until an explicit [`recluster`](Self::recluster) run.
    pub fn promote(
        &mut self,
        memory: &ConsolidatedMemory,
        embedding: Option<&[f32]>,
        now: DateTime<Utc>,
    ) -> SemanticNode {
        let cluster_id = match embedding {
            Some(vector) => {
                let features = feature_vector(&memory.semantic_category, Some(vector));
                self.clusterer.assign(&features)
            }
            None => category_cluster(&memory.semantic_category, self.config.cluster_count),
        };

        let age = now.signed_duration_since(memory.created_at);
        let mut node = SemanticNode {
            id: memory.id.clone(),
            cluster_id,
            competition_rank: 1,
            access_frequency: 0,
            retrieval_strength: 0.0,
            consolidated_strength: memory.consolidated_strength,
            semantic_category: memory.semantic_category.clone(),
            age_category: AgeCategory::from_age(age),
            schematization_state: SchematizationState::Episodic,
            created_at: memory.created_at,
            updated_at: now,
        };
        node.retrieval_strength = self.score(&node, now);
        node
    }

    fn score(&self, node: &SemanticNode, now: DateTime<Utc>) -> f64 {
        let age_seconds = now
            .signed_duration_since(node.created_at)
            .num_milliseconds()
            .max(0) as f64
            / 1000.0;
        retrieval_strength(
            &self.config,
            node.consolidated_strength,
            node.competition_rank,
            node.access_frequency,
            age_seconds,
        )
    }

    /// Rank members of every cluster by consolidated strength descending
    /// (1-based), then refresh the derived fields.
    pub fn rank_and_refresh(&self, nodes: &mut [SemanticNode], now: DateTime<Utc>) {
        let mut by_cluster: HashMap<u32, Vec<usize>> = HashMap::new();
        for (i, node) in nodes.iter().enumerate() {
            by_cluster.entry(node.cluster_id).or_default().push(i);
        }

        for members in by_cluster.values_mut() {
            members.sort_by(|&a, &b| {
                OrderedFloat(nodes[b].consolidated_strength)
                    .cmp(&OrderedFloat(nodes[a].consolidated_strength))
            });
            for (rank, &i) in members.iter().enumerate() {
                nodes[i].competition_rank = rank as u32 + 1;
            }
        }

        for node in nodes.iter_mut() {
            let age = now.signed_duration_since(node.created_at);
            node.age_category = AgeCategory::from_age(age);
            node.schematization_state = SchematizationState::from_access_frequency(
                node.access_frequency,
                (
                    self.config.consolidating_access_threshold,
                    self.config.schematized_access_threshold,
                ),
            );
            node.updated_at = now;
        }
        // Ranks feed the score, so scoring runs after ranking.
        for i in 0..nodes.len() {
            nodes[i].retrieval_strength = self.score(&nodes[i], now);
        }
    }

    /// Record an access: bumps the rolling frequency and re-derives the
    /// node's score.
    pub fn record_access(&self, node: &mut SemanticNode, now: DateTime<Utc>) {
        node.access_frequency = node.access_frequency.saturating_add(1);
        node.schematization_state = SchematizationState::from_access_frequency(
            node.access_frequency,
            (
                self.config.consolidating_access_threshold,
                self.config.schematized_access_threshold,
            ),
        );
        node.retrieval_strength = self.score(node, now);
        node.updated_at = now;
    }

    /// Weekly homeostatic rescaling: divide every node's retrieval
    /// strength by its cluster's mean, then hard-delete nodes that are
    /// both below the pruning threshold and remote in age.
    ///
    /// Returns the ids of pruned nodes.
    pub fn homeostatic_rescale(&self, nodes: &mut Vec<SemanticNode>) -> Vec<String> {
        let mut sums: HashMap<u32, (f64, usize)> = HashMap::new();
        for node in nodes.iter() {
            let entry = sums.entry(node.cluster_id).or_insert((0.0, 0));
            entry.0 += node.retrieval_strength;
            entry.1 += 1;
        }

        for node in nodes.iter_mut() {
            if let Some(&(sum, count)) = sums.get(&node.cluster_id) {
                let mean = sum / count as f64;
                if mean > 0.0 {
                    node.retrieval_strength = (node.retrieval_strength / mean).clamp(0.0, 1.0);
                }
            }
        }

        let threshold = self.config.pruning_threshold;
        let pruned: Vec<String> = nodes
            .iter()
            .filter(|n| n.retrieval_strength < threshold && n.age_category == AgeCategory::Remote)
            .map(|n| n.id.clone())
            .collect();
        nodes.retain(|n| {
            !(n.retrieval_strength < threshold && n.age_category == AgeCategory::Remote)
        });

        if !pruned.is_empty() {
            tracing::info!(pruned = pruned.len(), "homeostatic pruning");
        }
        pruned
    }

    /// Explicit re-cluster: the only operation allowed to move a node's
    /// cluster assignment. Reassigns every node from its stored category
    /// (and embedding, when supplied), then re-ranks.
    pub fn recluster(
        &mut self,
        nodes: &mut [SemanticNode],
        embeddings: &HashMap<String, Vec<f32>>,
        now: DateTime<Utc>,
    ) {
        self.clusterer.reset();
        for node in nodes.iter_mut() {
            node.cluster_id = match embeddings.get(&node.id) {
                Some(vector) => {
                    let features = feature_vector(&node.semantic_category, Some(vector));
                    self.clusterer.assign(&features)
                }
                None => category_cluster(&node.semantic_category, self.config.cluster_count),
            };
        }
        self.rank_and_refresh(nodes, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn memory(id: &str, strength: f64, category: &str, created_at: DateTime<Utc>) -> ConsolidatedMemory {
        ConsolidatedMemory::from_episode(id, format!("ep-{}", id), category, strength, created_at)
    }

    fn builder() -> SemanticNetworkBuilder {
        SemanticNetworkBuilder::new(SemanticConfig::default())
    }

    /// Cluster members with strengths [0.9, 0.6, 0.3] rank [1, 2, 3],
    /// and the retrieval score is reproducible bit-for-bit.
    #[test]
    fn test_competition_ranking_and_reproducible_score() {
        let mut builder = builder();
        let now = Utc::now();
        let created = now - Duration::days(1);

        let mut nodes: Vec<SemanticNode> = [0.9, 0.6, 0.3]
            .iter()
            .enumerate()
            .map(|(i, s)| builder.promote(&memory(&format!("n{}", i), *s, "navigation", created), None, now))
            .collect();
        assert!(nodes.iter().all(|n| n.cluster_id == nodes[0].cluster_id));

        builder.rank_and_refresh(&mut nodes, now);
        let ranks: Vec<u32> = nodes.iter().map(|n| n.competition_rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);

        // Recomputing from the same persisted fields gives identical bits.
        for node in &nodes {
            let again = retrieval_strength(
                &SemanticConfig::default(),
                node.consolidated_strength,
                node.competition_rank,
                node.access_frequency,
                now.signed_duration_since(node.created_at).num_milliseconds() as f64 / 1000.0,
            );
            assert_eq!(again.to_bits(), node.retrieval_strength.to_bits());
        }
    }

    #[test]
    fn test_retrieval_strength_formula_matches_default_weights() {
        let config = SemanticConfig::default();
        let score = retrieval_strength(&config, 0.9, 1, 0, 0.0);
        let expected = 0.3 * 0.9 + 0.2 * 0.5 + 0.2 * 1.0_f64.ln() + 0.3 * 1.0;
        assert!((score - expected).abs() < 1e-12);
    }

    #[test]
    fn test_retrieval_strength_clamped() {
        let config = SemanticConfig::default();
        // Huge access frequency pushes the log term past 1.
        let score = retrieval_strength(&config, 1.0, 1, 100_000, 0.0);
        assert!(score <= 1.0);
        assert!(retrieval_strength(&config, 0.0, u32::MAX, 0, f64::MAX) >= 0.0);
    }

    #[test]
    fn test_cluster_assignment_is_sticky_without_recluster() {
        let mut builder = builder();
        let now = Utc::now();
        let node = builder.promote(&memory("n1", 0.8, "navigation", now), None, now);
        let original = node.cluster_id;

        let mut nodes = vec![node];
        builder.rank_and_refresh(&mut nodes, now + Duration::days(30));
        builder.homeostatic_rescale(&mut nodes);
        assert_eq!(nodes[0].cluster_id, original);
    }

    #[test]
    fn test_embedding_and_category_paths_both_assign_within_budget() {
        let mut builder = builder();
        let now = Utc::now();
        let with_embedding = builder.promote(
            &memory("n1", 0.8, "navigation", now),
            Some(&[0.5, 0.5, 0.5]),
            now,
        );
        let without = builder.promote(&memory("n2", 0.8, "navigation", now), None, now);
        assert!(with_embedding.cluster_id < 1000);
        assert!(without.cluster_id < 1000);
        // Degraded mode is category-deterministic.
        assert_eq!(without.cluster_id, category_cluster("navigation", 1000));
    }

    #[test]
    fn test_access_drives_schematization() {
        let builder = builder();
        let now = Utc::now();
        let mut node = SemanticNetworkBuilder::new(SemanticConfig::default())
            .promote(&memory("n1", 0.8, "navigation", now), None, now);
        assert_eq!(node.schematization_state, SchematizationState::Episodic);

        for _ in 0..3 {
            builder.record_access(&mut node, now);
        }
        assert_eq!(node.schematization_state, SchematizationState::Consolidating);
        for _ in 0..7 {
            builder.record_access(&mut node, now);
        }
        assert_eq!(node.schematization_state, SchematizationState::Schematized);
    }

    #[test]
    fn test_rescale_divides_by_cluster_mean() {
        let builder = builder();
        let now = Utc::now();
        let created = now - Duration::days(2);
        let mut b = SemanticNetworkBuilder::new(SemanticConfig::default());
        let mut nodes: Vec<SemanticNode> = [0.9, 0.3]
            .iter()
            .enumerate()
            .map(|(i, s)| b.promote(&memory(&format!("n{}", i), *s, "navigation", created), None, now))
            .collect();
        b.rank_and_refresh(&mut nodes, now);

        let before: Vec<f64> = nodes.iter().map(|n| n.retrieval_strength).collect();
        let mean = (before[0] + before[1]) / 2.0;
        builder.homeostatic_rescale(&mut nodes);
        assert!((nodes[0].retrieval_strength - (before[0] / mean).clamp(0.0, 1.0)).abs() < 1e-12);
        assert!((nodes[1].retrieval_strength - (before[1] / mean).clamp(0.0, 1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_prune_requires_remote_age_and_low_strength() {
        let config = SemanticConfig::default();
        let builder = SemanticNetworkBuilder::new(config);
        let now = Utc::now();

        let mut nodes = Vec::new();
        // Remote and weak: pruned.
        let mut doomed = SemanticNetworkBuilder::new(SemanticConfig::default()).promote(
            &memory("doomed", 0.0, "navigation", now - Duration::days(400)),
            None,
            now,
        );
        doomed.retrieval_strength = 0.0;
        nodes.push(doomed);
        // Weak but recent: kept.
        let mut weak_recent = SemanticNetworkBuilder::new(SemanticConfig::default()).promote(
            &memory("weak_recent", 0.0, "cooking", now),
            None,
            now,
        );
        weak_recent.retrieval_strength = 0.0;
        nodes.push(weak_recent);

        let pruned = builder.homeostatic_rescale(&mut nodes);
        assert_eq!(pruned, vec!["doomed".to_string()]);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].id, "weak_recent");
    }

    #[test]
    fn test_recluster_moves_nodes_and_reranks() {
        let mut builder = builder();
        let now = Utc::now();
        let mut nodes = vec![
            builder.promote(&memory("n1", 0.9, "navigation", now), None, now),
            builder.promote(&memory("n2", 0.4, "navigation", now), None, now),
        ];

        let mut embeddings = HashMap::new();
        embeddings.insert("n1".to_string(), vec![0.0_f32; 8]);
        embeddings.insert("n2".to_string(), vec![100.0_f32; 8]);
        builder.recluster(&mut nodes, &embeddings, now);

        // Far-apart embeddings land in different clusters, each rank 1.
        assert_ne!(nodes[0].cluster_id, nodes[1].cluster_id);
        assert_eq!(nodes[0].competition_rank, 1);
        assert_eq!(nodes[1].competition_rank, 1);
    }
}
