//! Core data model for the consolidation pipeline.
//!
//! Records move strictly downstream:
//! [`MemoryItem`] -> [`Episode`] -> [`ConsolidatedMemory`] -> [`SemanticNode`],
//! with a [`WatermarkRecord`] per stage marking incremental progress.

mod consolidated;
mod episode;
mod memory_item;
mod report;
mod semantic;
mod watermark;

pub use consolidated::ConsolidatedMemory;
pub use episode::{Episode, EpisodeState};
pub use memory_item::{MemoryItem, MemoryStage};
pub use report::{RunReport, RunStatus};
pub use semantic::{AgeCategory, SchematizationState, SemanticNode};
pub use watermark::{content_hash, Stage, WatermarkRecord};
