/// Assessment catalog loading.
///
/// The catalog is a flat JSON array of records produced by an external collector. Records
/// are read-only once loaded; the index is derived from them and rebuilt whenever their
/// fingerprint changes.
use std::collections::HashSet;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::AppError;
use crate::model::{normalize_title, AssessmentRecord};

const FALLBACK_CATALOG: &str = include_str!("../data/fallback_catalog.json");

/// Load the catalog from `path`.
///
/// A missing or unreadable file yields an empty catalog with a warning; downstream search
/// then degrades to empty results instead of failing. Entries lacking `title` or `url`, and
/// titles that repeat once normalized, are skipped.
pub fn load_catalog(path: &Path) -> Vec<AssessmentRecord> {
    if !path.exists() {
        warn!(path = %path.display(), "assessment catalog not found");
        return Vec::new();
    }
    match std::fs::read_to_string(path)
        .map_err(|e| AppError::io(path, e))
        .and_then(|content| parse_catalog(&content))
    {
        Ok(records) => {
            info!(path = %path.display(), records = records.len(), "loaded assessment catalog");
            records
        }
        Err(e) => {
            warn!(error = %e, path = %path.display(), "failed to load assessment catalog");
            Vec::new()
        }
    }
}

/// Load the catalog, seeding `path` with the built-in fallback set when it does not exist.
pub fn load_or_seed(path: &Path) -> Result<Vec<AssessmentRecord>, AppError> {
    if path.exists() {
        return Ok(load_catalog(path));
    }

    let records = fallback_catalog()?;
    warn!(
        path = %path.display(),
        records = records.len(),
        "assessment catalog missing, seeding with fallback set"
    );
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| AppError::io(parent, e))?;
    }
    let json = serde_json::to_string_pretty(&records)
        .map_err(|e| AppError::Catalog(format!("serializing fallback catalog failed: {e}")))?;
    std::fs::write(path, json).map_err(|e| AppError::io(path, e))?;
    Ok(records)
}

/// The fixed record set used when no collected catalog is available.
pub fn fallback_catalog() -> Result<Vec<AssessmentRecord>, AppError> {
    parse_catalog(FALLBACK_CATALOG)
}

pub fn parse_catalog(content: &str) -> Result<Vec<AssessmentRecord>, AppError> {
    let entries: Vec<serde_json::Value> = serde_json::from_str(content)
        .map_err(|e| AppError::Catalog(format!("catalog is not a JSON array: {e}")))?;

    let mut seen = HashSet::new();
    let mut records = Vec::with_capacity(entries.len());
    for (position, entry) in entries.into_iter().enumerate() {
        let record: AssessmentRecord = match serde_json::from_value(entry) {
            Ok(r) => r,
            Err(e) => {
                warn!(position, error = %e, "skipping malformed catalog entry");
                continue;
            }
        };
        if record.title.trim().is_empty() || record.url.trim().is_empty() {
            warn!(position, "skipping catalog entry with empty title or url");
            continue;
        }
        if !seen.insert(normalize_title(&record.title)) {
            warn!(position, title = %record.title, "skipping duplicate catalog title");
            continue;
        }
        records.push(record);
    }
    Ok(records)
}

/// Build the text that gets embedded for a record.
pub fn compose_embedding_text(record: &AssessmentRecord) -> String {
    format!(
        "Title: {}\nDescription: {}\nType: {}\nDuration: {}\nRemote Testing: {}\nAdaptive Testing: {}\nFeatures: {}",
        record.title,
        record.description,
        record.test_type,
        record.duration,
        record.remote_testing_support,
        record.adaptive_irt_support,
        record.features.join(", ")
    )
}

/// Stable content hash of the catalog, used to detect when the index is stale.
pub fn catalog_fingerprint(records: &[AssessmentRecord]) -> String {
    let mut hasher = Sha256::new();
    for record in records {
        // serde_json output for a derived struct is field-ordered, so this is deterministic.
        if let Ok(json) = serde_json::to_vec(record) {
            hasher.update(&json);
        }
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}
