//! Memory item types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::{Display, EnumString};

/// Pipeline stage a memory item currently sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MemoryStage {
    /// Freshly arrived from the memory source, not yet seen by the gate.
    Incoming,
    /// Admitted into the bounded active set.
    Active,
    /// Evicted from the active set but kept for possible re-admission.
    Pending,
    /// Grouped into an episode.
    Episodic,
    /// Decayed below every threshold and dropped from the pipeline.
    Discarded,
}

impl Default for MemoryStage {
    fn default() -> Self {
        MemoryStage::Incoming
    }
}

/// A short-lived memory item flowing into the pipeline.
///
/// Items arrive from the append-only memory source with immutable
/// `id`/`content_ref`/`created_at`; everything else is pipeline state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    /// Unique identifier, stable across the whole pipeline.
    pub id: String,
    /// Opaque reference to the item content (the pipeline never reads it;
    /// collaborators do).
    pub content_ref: String,
    /// When the item was created upstream.
    pub created_at: DateTime<Utc>,
    /// Externally supplied sentiment score in [0, 1].
    pub sentiment: f64,
    /// Externally supplied importance score in [0, 1].
    pub importance: f64,
    /// Current pipeline stage.
    #[serde(default)]
    pub stage: MemoryStage,
    /// Current strength in [0, 1].
    pub strength: f64,
    /// How many times this item co-activated with others in its window.
    #[serde(default)]
    pub coactivations: u32,
    /// Custom metadata from the source feed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl MemoryItem {
    /// Create a new memory item with neutral salience inputs.
    pub fn new(id: impl Into<String>, content_ref: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            content_ref: content_ref.into(),
            created_at,
            sentiment: 0.5,
            importance: 0.5,
            stage: MemoryStage::Incoming,
            strength: 0.5,
            coactivations: 0,
            metadata: None,
        }
    }

    /// Set the sentiment score (clamped to [0, 1]).
    pub fn with_sentiment(mut self, sentiment: f64) -> Self {
        self.sentiment = sentiment.clamp(0.0, 1.0);
        self
    }

    /// Set the importance score (clamped to [0, 1]).
    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
        self
    }

    /// Set the initial strength (clamped to [0, 1]).
    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = strength.clamp(0.0, 1.0);
        self
    }

    /// Set the metadata map.
    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Age of the item relative to `now`, in seconds. Never negative.
    pub fn age_seconds(&self, now: DateTime<Utc>) -> f64 {
        let secs = now.signed_duration_since(self.created_at).num_milliseconds() as f64 / 1000.0;
        secs.max(0.0)
    }

    /// Externally supplied salience blend used by the attention gate.
    pub fn salience(&self) -> f64 {
        (self.sentiment + self.importance) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_item_defaults() {
        let item = MemoryItem::new("m1", "ref://1", Utc::now());
        assert_eq!(item.stage, MemoryStage::Incoming);
        assert_eq!(item.coactivations, 0);
        assert!((item.strength - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_salience_inputs_clamped() {
        let item = MemoryItem::new("m1", "ref://1", Utc::now())
            .with_sentiment(1.8)
            .with_importance(-0.2);
        assert_eq!(item.sentiment, 1.0);
        assert_eq!(item.importance, 0.0);
    }

    #[test]
    fn test_age_never_negative() {
        let future = Utc::now() + chrono::Duration::minutes(5);
        let item = MemoryItem::new("m1", "ref://1", future);
        assert_eq!(item.age_seconds(Utc::now()), 0.0);
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(format!("{}", MemoryStage::Active), "active");
        assert_eq!(format!("{}", MemoryStage::Discarded), "discarded");
    }
}
