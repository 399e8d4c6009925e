/// Embedding wrapper around fastembed.
///
/// `TextEmbedding` from fastembed is synchronous and CPU-bound. All embed calls go through
/// `tokio::task::spawn_blocking`, with the model held in an `Arc` so blocking tasks can
/// share it.
///
/// Output vectors are L2-normalized so cosine distance in the vector store is well defined
/// regardless of what the underlying model emits.
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::CommonError;

/// Anything that turns text into fixed-length dense vectors.
///
/// Documents and queries go through separate entry points because some models expect
/// task-specific prefixes. Implementations must return vectors of `dimensions()` length.
pub trait TextEmbedder: Send + Sync + 'static {
    fn embed_documents(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, CommonError>> + Send;

    fn embed_query(&self, query: &str) -> impl Future<Output = Result<Vec<f32>, CommonError>> + Send;

    fn dimensions(&self) -> usize;

    fn model_name(&self) -> &str;
}

/// Sentence-embedding models the recommender knows how to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingModelKind {
    AllMiniLmL6V2,
    AllMiniLmL12V2,
    BgeSmallEnV15,
    BgeBaseEnV15,
    NomicEmbedTextV15,
}

impl EmbeddingModelKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::AllMiniLmL6V2 => "all-MiniLM-L6-v2",
            Self::AllMiniLmL12V2 => "all-MiniLM-L12-v2",
            Self::BgeSmallEnV15 => "bge-small-en-v1.5",
            Self::BgeBaseEnV15 => "bge-base-en-v1.5",
            Self::NomicEmbedTextV15 => "nomic-embed-text-v1.5",
        }
    }

    pub fn dimensions(self) -> usize {
        match self {
            Self::AllMiniLmL6V2 | Self::AllMiniLmL12V2 | Self::BgeSmallEnV15 => 384,
            Self::BgeBaseEnV15 | Self::NomicEmbedTextV15 => 768,
        }
    }

    /// Prefixes for (document, query) inputs. Only nomic is trained with task prefixes.
    fn prefixes(self) -> (&'static str, &'static str) {
        match self {
            Self::NomicEmbedTextV15 => ("search_document: ", "search_query: "),
            _ => ("", ""),
        }
    }

    fn fastembed_model(self) -> fastembed::EmbeddingModel {
        match self {
            Self::AllMiniLmL6V2 => fastembed::EmbeddingModel::AllMiniLML6V2,
            Self::AllMiniLmL12V2 => fastembed::EmbeddingModel::AllMiniLML12V2,
            Self::BgeSmallEnV15 => fastembed::EmbeddingModel::BGESmallENV15,
            Self::BgeBaseEnV15 => fastembed::EmbeddingModel::BGEBaseENV15,
            Self::NomicEmbedTextV15 => fastembed::EmbeddingModel::NomicEmbedTextV15,
        }
    }
}

impl FromStr for EmbeddingModelKind {
    type Err = CommonError;

    /// Accepts the short model name, optionally with the `sentence-transformers/` or
    /// `BAAI/` / `nomic-ai/` hub prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().rsplit('/').next().unwrap_or_default().to_ascii_lowercase();
        match name.as_str() {
            "all-minilm-l6-v2" => Ok(Self::AllMiniLmL6V2),
            "all-minilm-l12-v2" => Ok(Self::AllMiniLmL12V2),
            "bge-small-en-v1.5" => Ok(Self::BgeSmallEnV15),
            "bge-base-en-v1.5" => Ok(Self::BgeBaseEnV15),
            "nomic-embed-text-v1.5" => Ok(Self::NomicEmbedTextV15),
            _ => Err(CommonError::Embedding(format!("unsupported embedding model: {s}"))),
        }
    }
}

/// Wraps fastembed's `TextEmbedding` model for generating vector embeddings.
pub struct Embedder {
    model: Arc<fastembed::TextEmbedding>,
    kind: EmbeddingModelKind,
}

impl Embedder {
    /// Initialize the embedding model.
    ///
    /// This downloads the model on first run. The download happens synchronously inside a
    /// blocking task.
    pub async fn new(kind: EmbeddingModelKind) -> Result<Self, CommonError> {
        let model = tokio::task::spawn_blocking(move || {
            let options = fastembed::InitOptions::new(kind.fastembed_model())
                .with_show_download_progress(true);
            fastembed::TextEmbedding::try_new(options)
        })
        .await
        .map_err(|e| CommonError::Embedding(format!("spawn_blocking join error: {e}")))?
        .map_err(|e| CommonError::Embedding(format!("model initialization failed: {e}")))?;

        Ok(Self {
            model: Arc::new(model),
            kind,
        })
    }
}

impl TextEmbedder for Embedder {
    /// Documents are processed in small batches to bound peak memory during ONNX inference.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CommonError> {
        let (doc_prefix, _) = self.kind.prefixes();
        let prefixed: Vec<String> = texts.iter().map(|t| format!("{doc_prefix}{t}")).collect();
        let model = Arc::clone(&self.model);
        let mut embeddings = tokio::task::spawn_blocking(move || model.embed(prefixed, Some(16)))
            .await
            .map_err(|e| CommonError::Embedding(format!("spawn_blocking join error: {e}")))?
            .map_err(|e| CommonError::Embedding(format!("document embedding failed: {e}")))?;
        embeddings.iter_mut().for_each(|v| normalize(v));
        Ok(embeddings)
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, CommonError> {
        let (_, query_prefix) = self.kind.prefixes();
        let prefixed = vec![format!("{query_prefix}{query}")];
        let model = Arc::clone(&self.model);
        let mut results = tokio::task::spawn_blocking(move || model.embed(prefixed, None))
            .await
            .map_err(|e| CommonError::Embedding(format!("spawn_blocking join error: {e}")))?
            .map_err(|e| CommonError::Embedding(format!("query embedding failed: {e}")))?;
        let mut vector = results
            .pop()
            .ok_or_else(|| CommonError::Embedding("empty embedding result".to_string()))?;
        normalize(&mut vector);
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.kind.dimensions()
    }

    fn model_name(&self) -> &str {
        self.kind.name()
    }
}

/// Scale a vector to unit L2 length in place. Zero vectors are left untouched.
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| (*v as f64) * (*v as f64)).sum::<f64>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return;
    }
    for v in vector.iter_mut() {
        *v = (*v as f64 / norm) as f32;
    }
}
