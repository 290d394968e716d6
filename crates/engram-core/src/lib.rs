//! engram-core - Core library for engram.
//!
//! This crate implements the biological memory consolidation pipeline:
//! a stream of short-lived memory items is filtered through a
//! capacity-bounded attention gate, grouped and strengthened through
//! simulated hippocampal replay, and organized into a long-term semantic
//! network with computed retrieval priority. Every stage persists its
//! output through crash-safe incremental write-back.
//!
//! # Example
//!
//! ```ignore
//! use engram_core::{Pipeline, PipelineConfig, PipelineStore};
//! use engram_core::traits::{NoopSink, RandomPairSampler};
//! use std::sync::Arc;
//!
//! let config = PipelineConfig::default();
//! let store = Arc::new(PipelineStore::open(&config.store).await?);
//! let mut pipeline = Pipeline::new(
//!     config,
//!     store,
//!     Arc::new(NoopSink),
//!     None, // enrichment collaborator
//!     None, // embedding collaborator
//!     Box::new(RandomPairSampler::new(0)),
//! )?;
//!
//! let report = pipeline.run_attention(incoming_items).await?;
//! let report = pipeline.run_episode_builder().await?;
//! let report = pipeline.run_consolidation().await?;
//! let report = pipeline.run_semantic().await?;
//! ```

pub mod attention;
pub mod cache;
pub mod config;
pub mod consolidation;
pub mod episode;
pub mod error;
pub mod retry;
pub mod runner;
pub mod semantic;
pub mod store;
pub mod traits;
pub mod types;
pub mod writeback;

// Re-export commonly used types
pub use attention::{AdmissionResult, AttentionGate};
pub use cache::ResponseCache;
pub use config::PipelineConfig;
pub use consolidation::{hebbian_update, AssociationGraph, ConsolidationEngine};
pub use episode::{EnrichedItem, EpisodeBuilder};
pub use error::{EngramError, EngramResult};
pub use runner::{CancelFlag, Pipeline};
pub use semantic::{retrieval_strength, SemanticNetworkBuilder};
pub use store::{PipelineStore, StoreRecord, WritebackTable};
pub use traits::{
    BatchMetrics, Embedder, EnrichmentProvider, Features, MetricsSink, NoopSink, PairSampler,
    RandomPairSampler, TracingSink,
};
pub use types::{
    AgeCategory, ConsolidatedMemory, Episode, EpisodeState, MemoryItem, MemoryStage, RunReport,
    RunStatus, SchematizationState, SemanticNode, Stage, WatermarkRecord,
};
pub use writeback::{WritebackJob, WritebackOutcome};
