//! Episode types and the consolidation state machine.
//!
//! An episode is a temporally and topically grouped cluster of items
//! representing one experience. Episodes move through a fixed state
//! machine during consolidation:
//!
//! ```text
//! Pending -> Replaying -> {Strengthened, Weakened} -> {ConsolidatedToLtm, Discarded}
//! ```
//!
//! The last two states are terminal. `ConsolidatedToLtm` in particular is
//! monotonic: an episode that reached it is never observed in an earlier
//! state again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Consolidation state of an episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EpisodeState {
    /// Waiting for a replay cycle.
    Pending,
    /// Currently being replayed against related episodes.
    Replaying,
    /// Replay raised the strength above the strengthen threshold.
    Strengthened,
    /// Replay left the strength below the decay threshold.
    Weakened,
    /// Promoted into long-term storage. Terminal.
    ConsolidatedToLtm,
    /// Decayed below every threshold and dropped. Terminal.
    Discarded,
}

impl EpisodeState {
    /// Whether this state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EpisodeState::ConsolidatedToLtm | EpisodeState::Discarded)
    }

    /// Whether a transition from `self` to `next` is legal.
    ///
    /// Terminal states admit no transitions. Strengthened episodes either
    /// consolidate or fall back to Pending for another cycle; Weakened
    /// episodes either recover to Pending or are discarded.
    pub fn can_transition_to(&self, next: EpisodeState) -> bool {
        use EpisodeState::*;
        match (self, next) {
            (Pending, Replaying) => true,
            (Replaying, Strengthened) | (Replaying, Weakened) => true,
            (Strengthened, ConsolidatedToLtm) | (Strengthened, Pending) => true,
            (Weakened, Discarded) | (Weakened, Pending) => true,
            _ => false,
        }
    }
}

impl Default for EpisodeState {
    fn default() -> Self {
        EpisodeState::Pending
    }
}

/// A group of memory items sharing a temporal/topical window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    /// Unique identifier.
    pub id: String,
    /// Semantic category shared by the grouped items.
    pub category: String,
    /// Ids of the items grouped into this episode. Deduplicated.
    pub item_ids: Vec<String>,
    /// Start of the co-activation window.
    pub window_start: DateTime<Utc>,
    /// End of the co-activation window.
    pub window_end: DateTime<Utc>,
    /// Recency decay factor, exp(-age / decay_constant), in [0, 1].
    pub recency_factor: f64,
    /// Weighted blend of sentiment and importance, in [0, 1].
    pub emotional_salience: f64,
    /// Short-term strength: recency_factor * emotional_salience.
    pub strength: f64,
    /// Deduplicated count of co-activations with same-category episodes
    /// in the rolling window. Capped to bound growth.
    pub hebbian_potential: u32,
    /// True once hebbian_potential and emotional_salience cross their
    /// configured thresholds.
    pub ready_for_consolidation: bool,
    /// Consolidation state machine position.
    #[serde(default)]
    pub state: EpisodeState,
    /// When the episode was built.
    pub created_at: DateTime<Utc>,
    /// Last state or strength change.
    pub updated_at: DateTime<Utc>,
}

impl Episode {
    /// Create a new pending episode over the given window.
    pub fn new(
        id: impl Into<String>,
        category: impl Into<String>,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            category: category.into(),
            item_ids: Vec::new(),
            window_start,
            window_end,
            recency_factor: 1.0,
            emotional_salience: 0.0,
            strength: 0.0,
            hebbian_potential: 0,
            ready_for_consolidation: false,
            state: EpisodeState::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Add an item id, ignoring duplicates. Returns true if added.
    pub fn add_item(&mut self, item_id: impl Into<String>) -> bool {
        let id = item_id.into();
        if self.item_ids.iter().any(|existing| *existing == id) {
            return false;
        }
        self.item_ids.push(id);
        true
    }

    /// Attempt a state transition. Returns an error string naming the
    /// illegal edge when the transition is not allowed.
    pub fn transition_to(&mut self, next: EpisodeState) -> Result<(), String> {
        if !self.state.can_transition_to(next) {
            return Err(format!("illegal transition {} -> {}", self.state, next));
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Set the strength, clamped to [0, 1].
    pub fn set_strength(&mut self, strength: f64) {
        self.strength = strength.clamp(0.0, 1.0);
        self.updated_at = Utc::now();
    }

    /// Midpoint of the window, used for time-adjacency during replay.
    pub fn window_midpoint(&self) -> DateTime<Utc> {
        let half = (self.window_end - self.window_start) / 2;
        self.window_start + half
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn episode() -> Episode {
        let now = Utc::now();
        Episode::new("ep1", "navigation", now - chrono::Duration::minutes(5), now)
    }

    #[test]
    fn test_legal_transitions() {
        let mut ep = episode();
        assert!(ep.transition_to(EpisodeState::Replaying).is_ok());
        assert!(ep.transition_to(EpisodeState::Strengthened).is_ok());
        assert!(ep.transition_to(EpisodeState::ConsolidatedToLtm).is_ok());
    }

    #[test]
    fn test_terminal_states_admit_nothing() {
        for terminal in [EpisodeState::ConsolidatedToLtm, EpisodeState::Discarded] {
            for next in [
                EpisodeState::Pending,
                EpisodeState::Replaying,
                EpisodeState::Strengthened,
                EpisodeState::Weakened,
                EpisodeState::ConsolidatedToLtm,
                EpisodeState::Discarded,
            ] {
                assert!(!terminal.can_transition_to(next), "{} -> {}", terminal, next);
            }
        }
    }

    #[test]
    fn test_skipping_replay_is_illegal() {
        let mut ep = episode();
        assert!(ep.transition_to(EpisodeState::Strengthened).is_err());
        assert_eq!(ep.state, EpisodeState::Pending);
    }

    #[test]
    fn test_weakened_can_recover() {
        assert!(EpisodeState::Weakened.can_transition_to(EpisodeState::Pending));
        assert!(EpisodeState::Weakened.can_transition_to(EpisodeState::Discarded));
        assert!(!EpisodeState::Weakened.can_transition_to(EpisodeState::ConsolidatedToLtm));
    }

    #[test]
    fn test_add_item_dedupes() {
        let mut ep = episode();
        assert!(ep.add_item("m1"));
        assert!(!ep.add_item("m1"));
        assert_eq!(ep.item_ids.len(), 1);
    }

    #[test]
    fn test_strength_clamped() {
        let mut ep = episode();
        ep.set_strength(1.4);
        assert_eq!(ep.strength, 1.0);
        ep.set_strength(-0.3);
        assert_eq!(ep.strength, 0.0);
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&EpisodeState::ConsolidatedToLtm).unwrap();
        assert_eq!(json, "\"consolidated_to_ltm\"");
        let restored: EpisodeState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, EpisodeState::ConsolidatedToLtm);
    }
}
