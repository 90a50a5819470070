//! Local semantic embeddings
//!
//! fastembed-backed [`EmbeddingService`] using local ONNX inference.
//! Default model: nomic-embed-text-v1.5 (768d, 8192 token context),
//! Matryoshka-truncated to 256 dimensions for 3x storage savings with
//! ~2% quality loss.

use std::sync::{Mutex, OnceLock};

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use super::{normalize, EmbeddingError, EmbeddingService};

/// Embedding dimensions after Matryoshka truncation
pub const EMBEDDING_DIMENSIONS: usize = 256;

/// Maximum text length for embedding (truncated if longer)
const MAX_TEXT_LENGTH: usize = 8192;

/// Batch size for embedding generation
const BATCH_SIZE: usize = 32;

/// The model loads once per process and is shared behind a mutex
/// (fastembed's embed API takes &mut self).
static EMBEDDING_MODEL: OnceLock<Result<Mutex<TextEmbedding>, String>> = OnceLock::new();

/// Cache directory for fastembed model files.
/// `ENGRAM_EMBED_CACHE` overrides the platform cache directory.
fn cache_dir() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("ENGRAM_EMBED_CACHE") {
        return std::path::PathBuf::from(path);
    }
    if let Some(proj_dirs) = directories::ProjectDirs::from("dev", "engram", "engram") {
        return proj_dirs.cache_dir().join("fastembed");
    }
    if let Some(base_dirs) = directories::BaseDirs::new() {
        return base_dirs.home_dir().join(".cache/engram/fastembed");
    }
    std::path::PathBuf::from(".fastembed_cache")
}

fn get_model() -> Result<std::sync::MutexGuard<'static, TextEmbedding>, EmbeddingError> {
    let result = EMBEDDING_MODEL.get_or_init(|| {
        let cache = cache_dir();
        if let Err(e) = std::fs::create_dir_all(&cache) {
            tracing::warn!("failed to create embed cache dir {:?}: {}", cache, e);
        }

        let options = InitOptions::new(EmbeddingModel::NomicEmbedTextV15)
            .with_show_download_progress(true)
            .with_cache_dir(cache);

        TextEmbedding::try_new(options).map(Mutex::new).map_err(|e| {
            format!(
                "failed to initialize nomic-embed-text-v1.5: {e}. \
                 Ensure ONNX runtime is available and model files can be downloaded."
            )
        })
    });

    match result {
        Ok(model) => model
            .lock()
            .map_err(|e| EmbeddingError::ModelInit(format!("lock poisoned: {e}"))),
        Err(err) => Err(EmbeddingError::ModelInit(err.clone())),
    }
}

/// Truncate to [`EMBEDDING_DIMENSIONS`] and L2-normalize.
///
/// Nomic Embed v1.5 supports Matryoshka representation learning: the
/// first N dimensions of the 768-dim output ARE a valid N-dimensional
/// embedding.
#[inline]
fn matryoshka_truncate(mut vector: Vec<f32>) -> Vec<f32> {
    if vector.len() > EMBEDDING_DIMENSIONS {
        vector.truncate(EMBEDDING_DIMENSIONS);
    }
    normalize(&mut vector);
    vector
}

fn clip(text: &str) -> &str {
    if text.len() > MAX_TEXT_LENGTH {
        let mut end = MAX_TEXT_LENGTH;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        &text[..end]
    } else {
        text
    }
}

/// Local fastembed-backed embedding service
#[derive(Default)]
pub struct LocalEmbedder {
    _unused: (),
}

impl LocalEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the model eagerly (downloads on first use)
    pub fn init(&self) -> Result<(), EmbeddingError> {
        get_model().map(|_| ())
    }

    /// Check if the model is loadable
    pub fn is_ready(&self) -> bool {
        match get_model() {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("embedding model not ready: {}", e);
                false
            }
        }
    }

    fn embed_sync(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.is_empty() {
            return Err(EmbeddingError::InvalidInput("text cannot be empty".into()));
        }
        let mut model = get_model()?;
        let embeddings = model
            .embed(vec![clip(text)], None)
            .map_err(|e| EmbeddingError::Failed(e.to_string()))?;
        embeddings
            .into_iter()
            .next()
            .map(matryoshka_truncate)
            .ok_or_else(|| EmbeddingError::Failed("no embedding generated".into()))
    }

    fn embed_batch_sync(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let mut model = get_model()?;
        let mut all = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(BATCH_SIZE) {
            let clipped: Vec<&str> = chunk.iter().map(|t| clip(t)).collect();
            let embeddings = model
                .embed(clipped, None)
                .map_err(|e| EmbeddingError::Failed(e.to_string()))?;
            all.extend(embeddings.into_iter().map(matryoshka_truncate));
        }
        Ok(all)
    }
}

#[async_trait]
impl EmbeddingService for LocalEmbedder {
    fn dimension(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_sync(text)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.embed_batch_sync(texts)
    }
}
