//! engram-enrichment - Enrichment and embedding collaborators for engram.
//!
//! Provides the concrete implementations of the pipeline's cognitive
//! enrichment interface:
//!
//! - [`RemoteEnrichmentProvider`]: HTTP provider for a hosted enrichment
//!   service (feature extraction + pairwise similarity).
//! - [`RuleBasedProvider`]: deterministic local fallback with keyword
//!   heuristics; never fails, never blocks.
//! - [`CircuitBreakerProvider`]: wraps a primary and a fallback provider
//!   and trips to the fallback after repeated primary failures.
//! - [`create_enrichment_provider`]: factory selecting a provider stack
//!   from configuration.

mod circuit;
mod factory;
mod fallback;
mod remote;

pub use circuit::CircuitBreakerProvider;
pub use factory::{create_enrichment_provider, EnrichmentConfig, EnrichmentProviderKind};
pub use fallback::RuleBasedProvider;
pub use remote::{RemoteEmbedder, RemoteEnrichmentProvider};
