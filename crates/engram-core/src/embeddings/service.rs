//! The embedding service seam

use async_trait::async_trait;

/// Embedding errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbeddingError {
    /// Failed to initialize the embedding model
    #[error("model initialization failed: {0}")]
    ModelInit(String),

    /// Failed to generate an embedding (transient or permanent)
    #[error("embedding generation failed: {0}")]
    Failed(String),

    /// Invalid input (empty, malformed)
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// A pure text to vector function.
///
/// `dimension()` is stable for the lifetime of the instance; every
/// vector returned by `embed`/`embed_batch` has exactly that length.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Fixed output dimension
    fn dimension(&self) -> usize;

    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed a batch of texts, preserving order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}
