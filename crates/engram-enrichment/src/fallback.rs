//! Rule-based fallback enrichment.
//!
//! Deterministic, local, and infallible: keyword heuristics over the
//! content reference text. Quality is deliberately modest; the point is
//! that the pipeline keeps moving when the remote collaborator is down.

use async_trait::async_trait;
use std::collections::HashSet;

use engram_core::error::EngramResult;
use engram_core::traits::{EnrichmentProvider, Features};

const POSITIVE_MARKERS: &[&str] = &[
    "good", "great", "success", "win", "done", "resolved", "happy", "love",
];
const NEGATIVE_MARKERS: &[&str] = &[
    "bad", "fail", "error", "crash", "broken", "angry", "urgent", "loss",
];
const IMPORTANCE_MARKERS: &[&str] = &[
    "important", "critical", "deadline", "remember", "must", "always", "never",
];

/// Topic buckets keyed by indicative keywords.
const TOPIC_RULES: &[(&str, &[&str])] = &[
    ("work", &["meeting", "project", "deadline", "task", "review"]),
    ("social", &["friend", "family", "party", "dinner", "call"]),
    ("health", &["doctor", "exercise", "sleep", "medication", "run"]),
    ("travel", &["flight", "trip", "hotel", "train", "drive"]),
    ("finance", &["invoice", "payment", "budget", "bank", "tax"]),
];

/// Deterministic rule-based enrichment provider.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleBasedProvider;

impl RuleBasedProvider {
    /// Create a provider.
    pub fn new() -> Self {
        Self
    }

    fn tokens(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn marker_score(tokens: &[String], markers: &[&str]) -> usize {
        tokens
            .iter()
            .filter(|t| markers.contains(&t.as_str()))
            .count()
    }
}

#[async_trait]
impl EnrichmentProvider for RuleBasedProvider {
    async fn enrich(&self, content_ref: &str) -> EngramResult<Features> {
        let tokens = Self::tokens(content_ref);

        let topics: Vec<String> = TOPIC_RULES
            .iter()
            .filter(|(_, keywords)| tokens.iter().any(|t| keywords.contains(&t.as_str())))
            .map(|(topic, _)| topic.to_string())
            .collect();

        let positive = Self::marker_score(&tokens, POSITIVE_MARKERS) as f64;
        let negative = Self::marker_score(&tokens, NEGATIVE_MARKERS) as f64;
        // Neutral 0.5, pulled toward the dominant polarity.
        let sentiment = if positive + negative == 0.0 {
            0.5
        } else {
            (0.5 + 0.5 * (positive - negative) / (positive + negative)).clamp(0.0, 1.0)
        };

        let importance =
            (0.3 + 0.2 * Self::marker_score(&tokens, IMPORTANCE_MARKERS) as f64).clamp(0.0, 1.0);

        Ok(Features {
            entities: Vec::new(),
            topics,
            sentiment,
            importance,
            hierarchy: Vec::new(),
            spatial_context: None,
        })
    }

    /// Jaccard similarity over token sets.
    async fn similarity(&self, a: &str, b: &str) -> EngramResult<f64> {
        let set_a: HashSet<String> = Self::tokens(a).into_iter().collect();
        let set_b: HashSet<String> = Self::tokens(b).into_iter().collect();
        if set_a.is_empty() || set_b.is_empty() {
            return Ok(0.0);
        }
        let intersection = set_a.intersection(&set_b).count() as f64;
        let union = set_a.union(&set_b).count() as f64;
        Ok(intersection / union)
    }

    fn name(&self) -> &str {
        "rule_based"
    }
}
