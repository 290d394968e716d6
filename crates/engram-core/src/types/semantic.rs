//! Semantic network node types.
//!
//! A [`SemanticNode`] is the final long-term form of a memory: clustered,
//! ranked against its cluster peers, and scored for retrieval. Age and
//! schematization categories are derived, never stored authority.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Age category boundaries in days.
pub const RECENT_DAYS: i64 = 7;
pub const WEEK_OLD_DAYS: i64 = 30;
pub const MONTH_OLD_DAYS: i64 = 90;

/// Age category of a semantic node, derived from elapsed time since the
/// underlying experience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AgeCategory {
    /// Under 7 days old.
    Recent,
    /// 7-30 days old.
    WeekOld,
    /// 30-90 days old.
    MonthOld,
    /// 90+ days old. Only remote nodes are eligible for pruning.
    Remote,
}

impl AgeCategory {
    /// Determine the age category from elapsed time.
    pub fn from_age(age: Duration) -> Self {
        let days = age.num_days();
        if days < RECENT_DAYS {
            AgeCategory::Recent
        } else if days < WEEK_OLD_DAYS {
            AgeCategory::WeekOld
        } else if days < MONTH_OLD_DAYS {
            AgeCategory::MonthOld
        } else {
            AgeCategory::Remote
        }
    }
}

/// How far a node has progressed from an episodic trace toward a schema,
/// derived from its rolling 7-day access frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SchematizationState {
    /// Rarely accessed; still a raw episodic trace.
    Episodic,
    /// Accessed often enough that cortical integration is underway.
    Consolidating,
    /// Accessed frequently; integrated into a stable schema.
    Schematized,
}

impl SchematizationState {
    /// Derive the state from a rolling 7-day access frequency using the
    /// configured thresholds `(consolidating_at, schematized_at)`.
    pub fn from_access_frequency(frequency: u32, thresholds: (u32, u32)) -> Self {
        let (consolidating_at, schematized_at) = thresholds;
        if frequency >= schematized_at {
            SchematizationState::Schematized
        } else if frequency >= consolidating_at {
            SchematizationState::Consolidating
        } else {
            SchematizationState::Episodic
        }
    }
}

/// A long-term entity in the semantic network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticNode {
    /// Unique identifier (shared with the consolidated memory it wraps).
    pub id: String,
    /// Fixed cluster this node is assigned to. Sticky until an explicit
    /// re-cluster runs.
    pub cluster_id: u32,
    /// 1-based rank within the cluster, by consolidated strength descending.
    pub competition_rank: u32,
    /// Rolling 7-day access count.
    pub access_frequency: u32,
    /// Composite retrieval strength in [0, 1]. A pure function of the
    /// persisted fields; re-derivable at any time.
    pub retrieval_strength: f64,
    /// Consolidated strength carried over from promotion, in [0, 1].
    pub consolidated_strength: f64,
    /// Semantic category.
    pub semantic_category: String,
    /// Derived age category.
    pub age_category: AgeCategory,
    /// Derived schematization state.
    pub schematization_state: SchematizationState,
    /// Creation time of the underlying experience.
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Last recomputation of the derived fields.
    pub updated_at: chrono::DateTime<chrono::Utc>,
}
