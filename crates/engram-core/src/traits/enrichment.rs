//! Cognitive enrichment collaborator trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngramResult;

/// Structured features returned by the enrichment collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Features {
    /// Named entities found in the content.
    pub entities: Vec<String>,
    /// Topic labels, most relevant first.
    pub topics: Vec<String>,
    /// Sentiment score in [0, 1].
    pub sentiment: f64,
    /// Importance score in [0, 1].
    pub importance: f64,
    /// Hierarchical context path (e.g. project > task > step).
    pub hierarchy: Vec<String>,
    /// Spatial context label, when one applies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spatial_context: Option<String>,
}

impl Features {
    /// The category an episode built from this content belongs to: the
    /// top topic, falling back to the hierarchy root, then "general".
    pub fn primary_category(&self) -> String {
        self.topics
            .first()
            .or_else(|| self.hierarchy.first())
            .cloned()
            .unwrap_or_else(|| "general".to_string())
    }
}

/// Collaborator that turns opaque content references into structured
/// features and scores pairwise similarity during replay.
///
/// Failures are expected and non-fatal: the pipeline falls back per
/// component (empty association list, rule-based features) rather than
/// aborting the run.
#[async_trait]
pub trait EnrichmentProvider: Send + Sync {
    /// Extract structured features for one content reference.
    async fn enrich(&self, content_ref: &str) -> EngramResult<Features>;

    /// Pairwise similarity between two content references, in [0, 1].
    async fn similarity(&self, a: &str, b: &str) -> EngramResult<f64>;

    /// Provider name, for logs and metrics.
    fn name(&self) -> &str;
}
