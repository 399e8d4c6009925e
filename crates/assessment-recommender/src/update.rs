/// Index build and staleness checks for the assessment vector index.
///
/// The index is two artifacts under the LanceDB directory: the vector table itself and a
/// small JSON manifest describing what it was built from. A manifest mismatch (catalog
/// content, model, dimensions) or a missing/short table triggers a full rebuild; there are
/// no incremental updates.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow_array::{ArrayRef, FixedSizeListArray, Float32Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::catalog;
use crate::error::AppError;
use crate::model::AssessmentRecord;
use crate::search::RecommendationEngine;
use recommender_common::embedding::TextEmbedder;
use recommender_common::error::CommonError;
use recommender_common::vectordb::VectorDb;

pub const MANIFEST_FILE_NAME: &str = "index_manifest.json";

/// What an on-disk index was built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub catalog_fingerprint: String,
    pub model: String,
    pub dimensions: usize,
    pub entry_count: usize,
}

pub struct IndexService<E> {
    embedder: Arc<E>,
    vectordb: Arc<VectorDb>,
    manifest_path: PathBuf,
}

impl<E: TextEmbedder> IndexService<E> {
    pub fn new(embedder: Arc<E>, vectordb: Arc<VectorDb>, manifest_path: PathBuf) -> Self {
        Self {
            embedder,
            vectordb,
            manifest_path,
        }
    }

    fn expected_manifest(&self, records: &[AssessmentRecord]) -> IndexManifest {
        IndexManifest {
            catalog_fingerprint: catalog::catalog_fingerprint(records),
            model: self.embedder.model_name().to_string(),
            dimensions: self.embedder.dimensions(),
            entry_count: records.len(),
        }
    }

    /// The persisted index for `records`, if it exists and is current.
    pub async fn load_existing(
        &self,
        records: &[AssessmentRecord],
    ) -> Result<Option<IndexManifest>, AppError> {
        let Some(stored) = read_manifest(&self.manifest_path)? else {
            return Ok(None);
        };
        if stored != self.expected_manifest(records) {
            info!("index manifest does not match catalog or model");
            return Ok(None);
        }

        let table = RecommendationEngine::<E>::table_name();
        if !self.vectordb.table_exists(table).await? {
            info!(table, "vector table missing");
            return Ok(None);
        }
        let rows = self.vectordb.count_rows(table).await?;
        if rows != stored.entry_count {
            info!(rows, expected = stored.entry_count, "vector table row count mismatch");
            return Ok(None);
        }
        Ok(Some(stored))
    }

    /// Embed every record and replace the vector table, then write the manifest.
    pub async fn build(&self, records: &[AssessmentRecord]) -> Result<IndexManifest, AppError> {
        let (manifest, batch) = self.prepare(records).await?;
        self.commit(manifest, batch).await
    }

    /// Embed `records` into a record batch without touching the stored index.
    async fn prepare(
        &self,
        records: &[AssessmentRecord],
    ) -> Result<(IndexManifest, RecordBatch), AppError> {
        if records.is_empty() {
            return Err(AppError::IndexUnavailable(
                "catalog is empty, nothing to index".to_string(),
            ));
        }
        let manifest = self.expected_manifest(records);
        info!(
            records = records.len(),
            model = %manifest.model,
            "building assessment index"
        );

        let texts: Vec<String> = records.iter().map(catalog::compose_embedding_text).collect();
        let embeddings = self.embedder.embed_documents(&texts).await?;
        if embeddings.len() != records.len() {
            return Err(CommonError::Embedding(format!(
                "embedding count mismatch: expected {}, got {}",
                records.len(),
                embeddings.len()
            ))
            .into());
        }

        let batch = build_record_batch(records, &texts, &embeddings, manifest.dimensions)?;
        Ok((manifest, batch))
    }

    /// Replace the vector table with `batch` and record `manifest` beside it.
    async fn commit(&self, manifest: IndexManifest, batch: RecordBatch) -> Result<IndexManifest, AppError> {
        self.vectordb
            .create_or_replace_table(RecommendationEngine::<E>::table_name(), batch.schema(), vec![batch])
            .await?;

        write_manifest(&self.manifest_path, &manifest)?;
        info!(entries = manifest.entry_count, "assessment index built");
        Ok(manifest)
    }

    /// Reuse the persisted index when current; otherwise build a fresh one.
    ///
    /// A failed or stale load falls back to one build attempt. If that also fails the
    /// engine is left without an index and searches return empty.
    pub async fn initialize(&self, engine: &RecommendationEngine<E>, records: &[AssessmentRecord]) {
        let mut slot = engine.lock_index().await;
        match self.load_existing(records).await {
            Ok(Some(manifest)) => {
                info!(entries = manifest.entry_count, "loaded existing assessment index");
                *slot = Some(manifest);
                return;
            }
            Ok(None) => info!("assessment index missing or stale, rebuilding"),
            Err(e) => warn!(error = %e, "loading assessment index failed, rebuilding"),
        }
        *slot = self.build_or_unset(records).await;
    }

    /// Force a rebuild from `records`, replacing whatever the engine currently serves.
    ///
    /// Failures before the table is touched (empty catalog, embedding errors) leave the
    /// current index in service. A failure while replacing the table unsets it.
    pub async fn rebuild(
        &self,
        engine: &RecommendationEngine<E>,
        records: &[AssessmentRecord],
    ) -> Result<IndexManifest, AppError> {
        let mut slot = engine.lock_index().await;
        let (manifest, batch) = match self.prepare(records).await {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(error = %e, kept = slot.is_some(), "index rebuild aborted, keeping current index");
                return Err(e);
            }
        };
        match self.commit(manifest, batch).await {
            Ok(manifest) => {
                *slot = Some(manifest.clone());
                Ok(manifest)
            }
            Err(e) => {
                self.discard_manifest();
                *slot = None;
                Err(e)
            }
        }
    }

    async fn build_or_unset(&self, records: &[AssessmentRecord]) -> Option<IndexManifest> {
        match self.build(records).await {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                error!(error = %e, "building assessment index failed, searches will return nothing");
                self.discard_manifest();
                None
            }
        }
    }

    /// The table may be half-replaced; make sure a restart doesn't trust it.
    fn discard_manifest(&self) {
        if let Err(e) = remove_manifest(&self.manifest_path) {
            warn!(error = %e, "failed to remove stale index manifest");
        }
    }
}

fn read_manifest(path: &Path) -> Result<Option<IndexManifest>, AppError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path).map_err(|e| AppError::io(path, e))?;
    match serde_json::from_str(&content) {
        Ok(manifest) => Ok(Some(manifest)),
        Err(e) => {
            warn!(error = %e, path = %path.display(), "ignoring unreadable index manifest");
            Ok(None)
        }
    }
}

fn write_manifest(path: &Path, manifest: &IndexManifest) -> Result<(), AppError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| AppError::io(parent, e))?;
    }
    let json = serde_json::to_string_pretty(manifest)
        .map_err(|e| AppError::Catalog(format!("serializing index manifest failed: {e}")))?;
    std::fs::write(path, json).map_err(|e| AppError::io(path, e))
}

fn remove_manifest(path: &Path) -> Result<(), AppError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(AppError::io(path, e)),
    }
}

/// Build an Arrow RecordBatch from catalog records and their embeddings.
fn build_record_batch(
    records: &[AssessmentRecord],
    texts: &[String],
    embeddings: &[Vec<f32>],
    dimensions: usize,
) -> Result<RecordBatch, AppError> {
    if let Some((i, bad)) = embeddings.iter().enumerate().find(|(_, e)| e.len() != dimensions) {
        return Err(CommonError::Embedding(format!(
            "embedding {i} has {} dimensions, expected {dimensions}",
            bad.len()
        ))
        .into());
    }
    let dim = i32::try_from(dimensions)
        .map_err(|_| CommonError::VectorDb(format!("dimension {dimensions} out of range")))?;

    let column = |values: Vec<&str>| -> ArrayRef { Arc::new(StringArray::from(values)) };
    let titles = column(records.iter().map(|r| r.title.as_str()).collect());
    let urls = column(records.iter().map(|r| r.url.as_str()).collect());
    let remote = column(records.iter().map(|r| r.remote_testing_support.as_str()).collect());
    let adaptive = column(records.iter().map(|r| r.adaptive_irt_support.as_str()).collect());
    let durations = column(records.iter().map(|r| r.duration.as_str()).collect());
    let test_types = column(records.iter().map(|r| r.test_type.as_str()).collect());
    let text_column = column(texts.iter().map(|t| t.as_str()).collect());

    let item_field = Arc::new(Field::new("item", DataType::Float32, true));
    let flat_values: Vec<f32> = embeddings.iter().flat_map(|e| e.iter().copied()).collect();
    let embedding_array: ArrayRef = Arc::new(
        FixedSizeListArray::try_new(
            Arc::clone(&item_field),
            dim,
            Arc::new(Float32Array::from(flat_values)),
            None,
        )
        .map_err(|e| CommonError::VectorDb(format!("failed to build embedding array: {e}")))?,
    );

    let schema = Arc::new(Schema::new(vec![
        Field::new("title", DataType::Utf8, false),
        Field::new("url", DataType::Utf8, false),
        Field::new("remote_testing_support", DataType::Utf8, false),
        Field::new("adaptive_irt_support", DataType::Utf8, false),
        Field::new("duration", DataType::Utf8, false),
        Field::new("test_type", DataType::Utf8, false),
        Field::new("text", DataType::Utf8, false),
        Field::new("embedding", DataType::FixedSizeList(item_field, dim), false),
    ]));

    RecordBatch::try_new(
        schema,
        vec![
            titles,
            urls,
            remote,
            adaptive,
            durations,
            test_types,
            text_column,
            embedding_array,
        ],
    )
    .map_err(|e| CommonError::VectorDb(format!("failed to build record batch: {e}")).into())
}
