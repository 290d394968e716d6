//! Embedding collaborator trait.

use async_trait::async_trait;

use crate::error::EngramResult;

/// Optional collaborator supplying a fixed-length vector per consolidated
/// memory. Used only as a clustering feature: when no embedder is wired
/// in, clustering degrades to category-based assignment.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed one content reference.
    async fn embed(&self, content_ref: &str) -> EngramResult<Vec<f32>>;

    /// Length of the vectors this embedder produces.
    fn dimensions(&self) -> usize;
}
