/// Recommendation engine over the assessment vector index.
///
/// Embeds a query with the same model used to build the index, runs a cosine nearest-neighbour
/// search in LanceDB and maps rows back to display metadata. Search never fails outward: if
/// the index is missing or the lookup errors, the failure is logged and the caller gets an
/// empty list.
use std::sync::Arc;

use arrow_array::{Array, Float32Array, RecordBatch, StringArray};
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::filters::{filter_recommendations, FilterExtractor};
use crate::model::{QueryFilters, Recommendation, Support};
use crate::update::IndexManifest;
use recommender_common::embedding::TextEmbedder;
use recommender_common::vectordb::VectorDb;

const VECTOR_TABLE_NAME: &str = "assessments";
/// Upper bound on raw candidates fetched before auto-filtering.
const MAX_FILTER_CANDIDATES: usize = 30;

pub struct RecommendationEngine<E> {
    embedder: Arc<E>,
    vectordb: Arc<VectorDb>,
    extractor: FilterExtractor,
    index: RwLock<Option<IndexManifest>>,
}

impl<E: TextEmbedder> RecommendationEngine<E> {
    /// Create an engine with no index loaded. Searches return empty until an
    /// `IndexService` installs one.
    pub fn new(embedder: Arc<E>, vectordb: Arc<VectorDb>) -> Self {
        Self {
            embedder,
            vectordb,
            extractor: FilterExtractor::new(),
            index: RwLock::new(None),
        }
    }

    pub fn table_name() -> &'static str {
        VECTOR_TABLE_NAME
    }

    #[cfg(test)]
    pub async fn set_index(&self, manifest: Option<IndexManifest>) {
        *self.index.write().await = manifest;
    }

    pub async fn index_manifest(&self) -> Option<IndexManifest> {
        self.index.read().await.clone()
    }

    /// Exclusive access to the index slot. Held across a rebuild so no search observes a
    /// half-written table.
    pub async fn lock_index(&self) -> RwLockWriteGuard<'_, Option<IndexManifest>> {
        self.index.write().await
    }

    /// Top-`k` assessments by cosine similarity to `query`, best first.
    pub async fn search(&self, query: &str, k: usize) -> Vec<Recommendation> {
        if k == 0 {
            return Vec::new();
        }
        // Hold the read guard for the whole lookup so a concurrent rebuild can't swap the
        // table out mid-query.
        let index = self.index.read().await;
        if index.is_none() {
            warn!("vector index not initialized, returning no recommendations");
            return Vec::new();
        }

        match self.try_search(query, k).await {
            Ok(results) => {
                debug!(query, k, hits = results.len(), "search complete");
                results
            }
            Err(e) => {
                warn!(error = %e, query, "search failed, returning no recommendations");
                Vec::new()
            }
        }
    }

    async fn try_search(&self, query: &str, k: usize) -> Result<Vec<Recommendation>, AppError> {
        let query_embedding = self.embedder.embed_query(query).await?;
        let batches = self
            .vectordb
            .search(VECTOR_TABLE_NAME, &query_embedding, k)
            .await?;

        let mut results = extract_search_results(&batches);
        // Batches arrive ordered individually; enforce a global best-first order.
        results.sort_by(|a, b| b.similarity_score.total_cmp(&a.similarity_score));
        results.truncate(k);
        Ok(results)
    }

    pub async fn recommend(&self, query: &str, k: usize) -> Vec<Recommendation> {
        self.search(query, k).await
    }

    pub fn extract_filters(&self, query: &str) -> QueryFilters {
        self.extractor.extract(query)
    }

    /// Recommend with constraints pulled from the query itself.
    ///
    /// Over-fetches `min(2k, 30)` candidates, filters them, and returns the unfiltered top
    /// `k` if nothing survives.
    pub async fn recommend_with_auto_filter(&self, query: &str, k: usize) -> Vec<Recommendation> {
        let raw = self
            .recommend(query, k.saturating_mul(2).min(MAX_FILTER_CANDIDATES))
            .await;
        let filters = self.extract_filters(query);
        let results = apply_auto_filter(raw, &filters, k);
        info!(query, k, returned = results.len(), ?filters, "auto-filtered recommendations");
        results
    }
}

/// Filters are advisory: when they would leave fewer than `min(k, 1)` results, fall back to
/// the unfiltered top `k`.
pub fn apply_auto_filter(
    raw: Vec<Recommendation>,
    filters: &QueryFilters,
    k: usize,
) -> Vec<Recommendation> {
    let mut filtered = filter_recommendations(&raw, filters);
    if filtered.len() < k.min(1) {
        let mut raw = raw;
        raw.truncate(k);
        return raw;
    }
    filtered.truncate(k);
    filtered
}

/// Extract `Recommendation` values from LanceDB search result batches.
///
/// Expected columns: title, url, remote_testing_support, adaptive_irt_support, duration,
/// test_type (Utf8) and `_distance` (Float32, cosine).
fn extract_search_results(batches: &[RecordBatch]) -> Vec<Recommendation> {
    let mut results = Vec::new();

    for batch in batches {
        let schema = batch.schema();

        let title_col = get_string_column(batch, &schema, "title");
        let url_col = get_string_column(batch, &schema, "url");
        let remote_col = get_string_column(batch, &schema, "remote_testing_support");
        let adaptive_col = get_string_column(batch, &schema, "adaptive_irt_support");
        let duration_col = get_string_column(batch, &schema, "duration");
        let test_type_col = get_string_column(batch, &schema, "test_type");
        let distance_col: Option<&Float32Array> = get_float_column(batch, &schema, "_distance");

        let (
            Some(title_col),
            Some(url_col),
            Some(remote_col),
            Some(adaptive_col),
            Some(duration_col),
            Some(test_type_col),
        ) = (title_col, url_col, remote_col, adaptive_col, duration_col, test_type_col)
        else {
            warn!("search result batch missing expected columns");
            continue;
        };

        for row in 0..batch.num_rows() {
            // Cosine distance is 1 - cos(θ), so this recovers the similarity.
            let distance = distance_col.map(|c| c.value(row)).unwrap_or(1.0);
            let similarity_score = (1.0_f32 - distance).clamp(-1.0, 1.0);

            results.push(Recommendation {
                title: title_col.value(row).to_string(),
                url: url_col.value(row).to_string(),
                remote_testing_support: Support::from(remote_col.value(row)),
                adaptive_irt_support: Support::from(adaptive_col.value(row)),
                duration: duration_col.value(row).to_string(),
                test_type: test_type_col.value(row).to_string(),
                similarity_score,
            });
        }
    }

    results
}

fn get_string_column<'a>(
    batch: &'a RecordBatch,
    schema: &arrow_schema::Schema,
    name: &str,
) -> Option<&'a StringArray> {
    let idx = schema.index_of(name).ok()?;
    batch.column(idx).as_any().downcast_ref::<StringArray>()
}

fn get_float_column<'a>(
    batch: &'a RecordBatch,
    schema: &arrow_schema::Schema,
    name: &str,
) -> Option<&'a Float32Array> {
    let idx = schema.index_of(name).ok()?;
    batch.column(idx).as_any().downcast_ref::<Float32Array>()
}
