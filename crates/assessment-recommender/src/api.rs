use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::model::{Recommendation, Support};

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RecommendParams {
    /// Job description or natural language query.
    pub query: String,
    /// Maximum number of recommendations (default: 10, max: 10).
    pub max_results: Option<u32>,
    /// Optional job posting URL. When given, the page text replaces `query`.
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SearchAssessmentsParams {
    /// The search query.
    pub query: String,
    /// Maximum number of results to return (default: 10, max: 50).
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ExtractFiltersParams {
    pub query: String,
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct EvaluateParams {
    /// Cutoffs to score at (default: [3, 5, 10]).
    pub k_values: Option<Vec<u32>>,
    /// Rank through the constraint-filtering pipeline instead of plain similarity.
    pub auto_filter: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
    pub index_ready: bool,
    pub entry_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RecommendedAssessment {
    pub title: String,
    pub url: String,
    pub remote_testing_support: Support,
    pub adaptive_irt_support: Support,
    pub duration: String,
    pub test_type: String,
}

impl From<Recommendation> for RecommendedAssessment {
    fn from(rec: Recommendation) -> Self {
        Self {
            title: rec.title,
            url: rec.url,
            remote_testing_support: rec.remote_testing_support,
            adaptive_irt_support: rec.adaptive_irt_support,
            duration: rec.duration,
            test_type: rec.test_type,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RecommendResponse {
    pub recommendations: Vec<RecommendedAssessment>,
    /// The query as given, or "Content from <url>" for URL input.
    pub query: String,
    /// "text" or "url".
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchAssessmentsResponse {
    pub results: Vec<Recommendation>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EvaluateResponse {
    pub valid_queries: usize,
    pub overall: BTreeMap<String, f64>,
    pub results_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RebuildIndexResponse {
    pub entry_count: usize,
    pub model: String,
}
