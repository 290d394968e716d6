//! Consolidated memory type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A durable memory derived exactly once from an episode.
///
/// Associations to other consolidated memories are not stored here; they
/// live in the association graph's edge collection so that no node owns
/// another (the episode-to-episode replay links would otherwise be cyclic).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidatedMemory {
    /// Unique identifier.
    pub id: String,
    /// The episode this memory was derived from.
    pub episode_id: String,
    /// Consolidated strength in [0, 1].
    pub consolidated_strength: f64,
    /// Semantic category inherited from the episode.
    pub semantic_category: String,
    /// Creation time of the underlying experience (episode window start).
    pub created_at: DateTime<Utc>,
    /// When promotion out of the episodic store happened.
    pub consolidated_at: DateTime<Utc>,
}

impl ConsolidatedMemory {
    /// Derive a consolidated memory from episode fields. Strength is
    /// clamped to [0, 1].
    pub fn from_episode(
        id: impl Into<String>,
        episode_id: impl Into<String>,
        category: impl Into<String>,
        strength: f64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            episode_id: episode_id.into(),
            consolidated_strength: strength.clamp(0.0, 1.0),
            semantic_category: category.into(),
            created_at,
            consolidated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_episode_clamps_strength() {
        let m = ConsolidatedMemory::from_episode("c1", "ep1", "navigation", 1.3, Utc::now());
        assert_eq!(m.consolidated_strength, 1.0);
        assert_eq!(m.episode_id, "ep1");
    }
}
