//! Consolidation engine.
//!
//! Implements the replay-driven middle of the pipeline: episodes are
//! replayed against related episodes, strengthened or weakened by Hebbian
//! dynamics and competitive forgetting, and the strong ones are promoted
//! into durable [`ConsolidatedMemory`](crate::types::ConsolidatedMemory)
//! records. Promotion is monotonic: an episode that reached
//! `ConsolidatedToLtm` never reverts.
//!
//! Replay associations form a directed weighted graph. Edges are owned by
//! the [`AssociationGraph`] collection, never by the episodes themselves,
//! which keeps the episode-to-episode references acyclic in the data
//! model.

mod engine;
mod replay;

pub use engine::{hebbian_update, ConsolidationEngine, CycleOutcome};
pub use replay::{Association, AssociationGraph};
