//! Semantic network builder (long-term memory).
//!
//! Organizes consolidated memories into a fixed number of cortical
//! clusters, ranks within-cluster competition, and computes a pure,
//! re-derivable retrieval strength per node. A weekly homeostatic pass
//! rescales each cluster around its mean and prunes remote nodes that
//! fell below the pruning threshold.

mod clusterer;
mod network;

pub use clusterer::{category_cluster, feature_vector, AdaptiveClusterer};
pub use network::{retrieval_strength, SemanticNetworkBuilder};
