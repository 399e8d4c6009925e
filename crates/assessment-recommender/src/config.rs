use std::path::PathBuf;
use std::time::Duration;

use recommender_common::embedding::EmbeddingModelKind;

use crate::error::AppError;

const DEFAULT_CATALOG_PATH: &str = "data/shl_assessments.json";
const DEFAULT_TEST_DATA_PATH: &str = "data/test_data.json";
const DEFAULT_EVAL_OUTPUT_DIR: &str = "evaluation_results";
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;

/// Application configuration loaded explicitly from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Filesystem path to the LanceDB data directory. The index manifest lives beside the
    /// table inside this directory.
    pub lancedb_path: String,
    /// JSON array of assessment records.
    pub catalog_path: PathBuf,
    /// Queries and ground-truth titles for offline evaluation.
    pub test_data_path: PathBuf,
    pub eval_output_dir: PathBuf,
    pub embedding_model: EmbeddingModelKind,
    pub fetch_timeout: Duration,
    /// When set, serve MCP over TCP on this address instead of stdio.
    pub tcp_listen_addr: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `LANCEDB_PATH`: path to LanceDB data directory
    ///
    /// Optional:
    /// - `ASSESSMENT_CATALOG_PATH` (default: "data/shl_assessments.json")
    /// - `ASSESSMENT_TEST_DATA_PATH` (default: "data/test_data.json")
    /// - `ASSESSMENT_EVAL_OUTPUT_DIR` (default: "evaluation_results")
    /// - `EMBEDDING_MODEL` (default: "all-MiniLM-L6-v2")
    /// - `FETCH_TIMEOUT_SECS` (default: 10)
    /// - `MCP_TCP_LISTEN_ADDR`
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let lancedb_path = lookup("LANCEDB_PATH")
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| {
                AppError::Config("LANCEDB_PATH environment variable is required".to_string())
            })?;

        let embedding_model = lookup("EMBEDDING_MODEL")
            .map(|name| {
                name.parse::<EmbeddingModelKind>()
                    .map_err(|e| AppError::Config(format!("EMBEDDING_MODEL: {e}")))
            })
            .transpose()?
            .unwrap_or(EmbeddingModelKind::AllMiniLmL6V2);

        let fetch_timeout = match lookup("FETCH_TIMEOUT_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|&n| n > 0)
                .map(Duration::from_secs)
                .ok_or_else(|| {
                    AppError::Config(format!(
                        "FETCH_TIMEOUT_SECS must be a positive integer, got {raw:?}"
                    ))
                })?,
            None => Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
        };

        let path_or = |key: &str, default: &str| {
            PathBuf::from(lookup(key).unwrap_or_else(|| default.to_string()))
        };

        Ok(Self {
            lancedb_path,
            catalog_path: path_or("ASSESSMENT_CATALOG_PATH", DEFAULT_CATALOG_PATH),
            test_data_path: path_or("ASSESSMENT_TEST_DATA_PATH", DEFAULT_TEST_DATA_PATH),
            eval_output_dir: path_or("ASSESSMENT_EVAL_OUTPUT_DIR", DEFAULT_EVAL_OUTPUT_DIR),
            embedding_model,
            fetch_timeout,
            tcp_listen_addr: lookup("MCP_TCP_LISTEN_ADDR"),
        })
    }

    /// Returns the path of the index manifest stored next to the vector table.
    pub fn manifest_path(&self) -> PathBuf {
        PathBuf::from(&self.lancedb_path).join(crate::update::MANIFEST_FILE_NAME)
    }
}
