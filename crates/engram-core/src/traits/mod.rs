//! Collaborator traits.
//!
//! Everything the pipeline needs from the outside world comes in through
//! these traits: feature enrichment, embeddings, observability, and the
//! creative-association sampling strategy. The core stages are
//! provider-agnostic; concrete implementations live in
//! `engram-enrichment` and in test doubles.

mod embedder;
mod enrichment;
mod observability;
mod sampling;

pub use embedder::Embedder;
pub use enrichment::{EnrichmentProvider, Features};
pub use observability::{BatchMetrics, MetricsSink, NoopSink, TracingSink};
pub use sampling::{PairSampler, RandomPairSampler};
