//! Deterministic embedders and index fixtures for tests. No model download involved.
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use recommender_common::embedding::{normalize, TextEmbedder};
use recommender_common::error::CommonError;
use recommender_common::vectordb::VectorDb;

use crate::model::AssessmentRecord;
use crate::search::RecommendationEngine;
use crate::update::{IndexService, MANIFEST_FILE_NAME};

/// Bag-of-words feature hashing: each lower-cased alphanumeric token bumps one bucket.
pub struct HashingEmbedder {
    dimensions: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self { dimensions: 256 }
    }
}

impl HashingEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        // Bias bucket keeps token-free input away from the zero vector.
        vector[0] = 0.01;
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            let bucket = 1 + (hasher.finish() as usize) % (self.dimensions - 1);
            vector[bucket] += 1.0;
        }
        normalize(&mut vector);
        vector
    }
}

impl TextEmbedder for HashingEmbedder {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CommonError> {
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, CommonError> {
        Ok(self.embed(query))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "feature-hashing"
    }
}

/// Always errors, for exercising the degraded paths.
pub struct FailingEmbedder;

impl TextEmbedder for FailingEmbedder {
    async fn embed_documents(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, CommonError> {
        Err(CommonError::Embedding("model unavailable".to_string()))
    }

    async fn embed_query(&self, _query: &str) -> Result<Vec<f32>, CommonError> {
        Err(CommonError::Embedding("model unavailable".to_string()))
    }

    fn dimensions(&self) -> usize {
        8
    }

    fn model_name(&self) -> &str {
        "failing"
    }
}

/// An engine with `records` indexed into a fresh temporary LanceDB. Keep the `TempDir`
/// alive for as long as the engine is used.
pub async fn engine_with_index(
    records: &[AssessmentRecord],
) -> (Arc<RecommendationEngine<HashingEmbedder>>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let vectordb = Arc::new(VectorDb::connect(dir.path().to_str().unwrap()).await.unwrap());
    let embedder = Arc::new(HashingEmbedder::default());
    let engine = Arc::new(RecommendationEngine::new(Arc::clone(&embedder), Arc::clone(&vectordb)));
    let service = IndexService::new(embedder, vectordb, dir.path().join(MANIFEST_FILE_NAME));
    service.initialize(&engine, records).await;
    assert!(engine.index_manifest().await.is_some(), "test index failed to build");
    (engine, dir)
}
