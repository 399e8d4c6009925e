/// MCP server implementation for the assessment recommender.
///
/// Exposes six tools:
/// - `health`: Liveness plus index status
/// - `recommend_assessments`: Auto-filtered recommendations for a query or job posting URL
/// - `search_assessments`: Raw similarity hits with scores
/// - `extract_query_filters`: The constraints a query implies
/// - `evaluate_recommendations`: Score against the ground-truth set and persist the results
/// - `rebuild_index`: Re-embed the catalog into a fresh index
use std::sync::Arc;

use rmcp::{
    Json, ServerHandler,
    handler::server::router::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::*,
    tool, tool_handler, tool_router,
};
use tracing::{error, info};

use crate::api::{
    EvaluateParams, EvaluateResponse, ExtractFiltersParams, HealthResponse, RebuildIndexResponse,
    RecommendParams, RecommendResponse, SearchAssessmentsParams, SearchAssessmentsResponse,
};
use crate::catalog;
use crate::config::Config;
use crate::evaluation::{self, RankingMode, DEFAULT_K_VALUES};
use crate::model::QueryFilters;
use crate::search::RecommendationEngine;
use crate::update::IndexService;
use recommender_common::embedding::Embedder;
use recommender_common::fetch::PageFetcher;

const MAX_RECOMMENDATIONS: u32 = 10;
const MAX_SEARCH_RESULTS: u32 = 50;

#[derive(Clone)]
pub struct RecommenderServer {
    engine: Arc<RecommendationEngine<Embedder>>,
    index_service: Arc<IndexService<Embedder>>,
    fetcher: Arc<PageFetcher>,
    config: Arc<Config>,
    tool_router: ToolRouter<RecommenderServer>,
}

impl RecommenderServer {
    pub fn new(
        engine: Arc<RecommendationEngine<Embedder>>,
        index_service: Arc<IndexService<Embedder>>,
        fetcher: PageFetcher,
        config: Config,
    ) -> Self {
        Self {
            engine,
            index_service,
            fetcher: Arc::new(fetcher),
            config: Arc::new(config),
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router]
impl RecommenderServer {
    #[tool(description = "Check that the recommender is running and whether its assessment index is loaded.")]
    async fn health(&self) -> Result<Json<HealthResponse>, String> {
        let manifest = self.engine.index_manifest().await;
        Ok(Json(HealthResponse {
            status: "ok".to_string(),
            message: "assessment recommender is running".to_string(),
            index_ready: manifest.is_some(),
            entry_count: manifest.map_or(0, |m| m.entry_count),
        }))
    }

    #[tool(description = "Recommend assessments for a job description or natural language query. Duration, remote, adaptive and test-type constraints in the text are applied as filters. Pass `url` to use a job posting page as the query.")]
    async fn recommend_assessments(
        &self,
        Parameters(params): Parameters<RecommendParams>,
    ) -> Result<Json<RecommendResponse>, String> {
        let request = resolve_request(&self.fetcher, &params).await?;
        let recommendations = self
            .engine
            .recommend_with_auto_filter(&request.query, request.k)
            .await
            .into_iter()
            .map(Into::into)
            .collect();

        Ok(Json(RecommendResponse {
            recommendations,
            query: request.echo,
            source: request.source.to_string(),
        }))
    }

    #[tool(description = "Semantic similarity search over the assessment catalog, without constraint filtering. Returns hits with similarity scores, best first.")]
    async fn search_assessments(
        &self,
        Parameters(params): Parameters<SearchAssessmentsParams>,
    ) -> Result<Json<SearchAssessmentsResponse>, String> {
        let query = params.query.trim();
        if query.is_empty() {
            return Err("query must not be empty".to_string());
        }
        let limit = params.limit.unwrap_or(10).min(MAX_SEARCH_RESULTS) as usize;
        let results = self.engine.search(query, limit).await;
        Ok(Json(SearchAssessmentsResponse { results }))
    }

    #[tool(description = "Show the constraints (duration limit, remote, adaptive/IRT, test type) extracted from a query.")]
    async fn extract_query_filters(
        &self,
        Parameters(params): Parameters<ExtractFiltersParams>,
    ) -> Result<Json<QueryFilters>, String> {
        Ok(Json(self.engine.extract_filters(&params.query)))
    }

    #[tool(description = "Evaluate recommendation quality (precision@k, recall@k, MAP@k) against the ground-truth test set and save the results file.")]
    async fn evaluate_recommendations(
        &self,
        Parameters(params): Parameters<EvaluateParams>,
    ) -> Result<Json<EvaluateResponse>, String> {
        info!("evaluate_recommendations tool invoked");
        let k_values: Vec<usize> = match params.k_values {
            Some(ks) => ks.into_iter().map(|k| k as usize).collect(),
            None => DEFAULT_K_VALUES.to_vec(),
        };
        let mode = if params.auto_filter.unwrap_or(false) {
            RankingMode::AutoFilter
        } else {
            RankingMode::Similarity
        };

        let test_data = evaluation::load_or_create_test_data(&self.config.test_data_path)
            .map_err(|e| format!("internal error: {e}"))?;
        let results = evaluation::evaluate(&self.engine, &test_data, &k_values, mode)
            .await
            .map_err(|e| format!("internal error: {e}"))?;
        let path = results
            .save(&self.config.eval_output_dir)
            .map_err(|e| format!("internal error: {e}"))?;

        Ok(Json(EvaluateResponse {
            valid_queries: results.valid_queries,
            overall: results.overall,
            results_path: path.display().to_string(),
        }))
    }

    #[tool(description = "Re-read the assessment catalog and rebuild the vector index from scratch.")]
    async fn rebuild_index(&self) -> Result<Json<RebuildIndexResponse>, String> {
        info!("rebuild_index tool invoked");
        let records = catalog::load_or_seed(&self.config.catalog_path)
            .map_err(|e| format!("internal error: {e}"))?;
        let manifest = self
            .index_service
            .rebuild(&self.engine, &records)
            .await
            .map_err(|e| format!("internal error: {e}"))?;
        Ok(Json(RebuildIndexResponse {
            entry_count: manifest.entry_count,
            model: manifest.model,
        }))
    }
}

/// A recommendation request with its query text and result count settled.
#[derive(Debug, PartialEq)]
struct ResolvedRequest {
    /// Text to rank against: the query, or the fetched page text.
    query: String,
    /// What the response reports as the query.
    echo: String,
    source: &'static str,
    k: usize,
}

fn recommendation_limit(max_results: Option<u32>) -> usize {
    max_results
        .unwrap_or(MAX_RECOMMENDATIONS)
        .min(MAX_RECOMMENDATIONS) as usize
}

/// A non-blank `url` wins over `query` and is fetched; otherwise `query` must be non-blank.
async fn resolve_request(
    fetcher: &PageFetcher,
    params: &RecommendParams,
) -> Result<ResolvedRequest, String> {
    let k = recommendation_limit(params.max_results);
    let url = params
        .url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty());

    match url {
        Some(url) => {
            info!(url, "fetching content from URL");
            let text = fetcher.fetch_text(url).await.map_err(|e| {
                error!(url, error = %e, "URL fetch failed");
                format!("failed to fetch content from URL: {e}")
            })?;
            Ok(ResolvedRequest {
                query: text,
                echo: format!("Content from {url}"),
                source: "url",
                k,
            })
        }
        None => {
            let query = params.query.trim();
            if query.is_empty() {
                return Err("query must not be empty".to_string());
            }
            Ok(ResolvedRequest {
                query: query.to_string(),
                echo: params.query.clone(),
                source: "text",
                k,
            })
        }
    }
}

#[tool_handler]
impl ServerHandler for RecommenderServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_06_18,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .build(),
            server_info: Implementation {
                name: "assessment-recommender".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Assessment recommender MCP server. Use recommend_assessments with a job \
                 description, query or job posting URL to get up to 10 matching assessments, \
                 search_assessments for raw similarity hits, extract_query_filters to see the \
                 constraints a query implies, evaluate_recommendations to score retrieval \
                 quality, and rebuild_index after the catalog changes."
                    .to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use recommender_common::fetch::PageFetcherConfig;

    fn params(query: &str, max_results: Option<u32>, url: Option<&str>) -> RecommendParams {
        RecommendParams {
            query: query.to_string(),
            max_results,
            url: url.map(str::to_string),
        }
    }

    fn fetcher() -> PageFetcher {
        PageFetcher::new(PageFetcherConfig {
            timeout: Duration::from_secs(5),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn tools_publish_output_schemas() {
        let tools = RecommenderServer::tool_router().list_all();
        for name in [
            "health",
            "recommend_assessments",
            "search_assessments",
            "extract_query_filters",
            "evaluate_recommendations",
            "rebuild_index",
        ] {
            let tool = tools
                .iter()
                .find(|t| t.name == name)
                .unwrap_or_else(|| panic!("missing tool: {name}"));
            assert!(
                tool.output_schema.is_some(),
                "tool {name} should publish output_schema"
            );
        }
    }

    #[test]
    fn recommendation_limit_defaults_and_clamps() {
        assert_eq!(recommendation_limit(None), 10);
        assert_eq!(recommendation_limit(Some(3)), 3);
        assert_eq!(recommendation_limit(Some(25)), 10);
        assert_eq!(recommendation_limit(Some(0)), 0);
    }

    #[tokio::test]
    async fn text_query_echoes_input() {
        let request = resolve_request(&fetcher(), &params("  Java developers, 40 minutes ", Some(50), None))
            .await
            .unwrap();
        assert_eq!(
            request,
            ResolvedRequest {
                query: "Java developers, 40 minutes".to_string(),
                echo: "  Java developers, 40 minutes ".to_string(),
                source: "text",
                k: 10,
            }
        );

        // A blank url is ignored.
        let request = resolve_request(&fetcher(), &params("sales manager", None, Some("   ")))
            .await
            .unwrap();
        assert_eq!(request.source, "text");
    }

    #[tokio::test]
    async fn blank_query_without_url_is_rejected() {
        let err = resolve_request(&fetcher(), &params("   ", None, None))
            .await
            .unwrap_err();
        assert_eq!(err, "query must not be empty");
    }

    #[tokio::test]
    async fn bad_url_is_a_fetch_error() {
        for url in ["not a url", "ftp://example.com/job"] {
            let err = resolve_request(&fetcher(), &params("", None, Some(url)))
                .await
                .unwrap_err();
            assert!(
                err.starts_with("failed to fetch content from URL: "),
                "unexpected error for {url}: {err}"
            );
        }
    }

    #[tokio::test]
    async fn url_content_replaces_query() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = stream.read(&mut request).await;
            let body = "<html><body><h1>Python developer</h1><p>remote, 30 minutes</p></body></html>";
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        });
        let url = format!("http://{addr}/posting");

        let request = resolve_request(&fetcher(), &params("ignored", Some(5), Some(&url)))
            .await
            .unwrap();
        assert_eq!(request.query, "Python developer remote, 30 minutes");
        assert_eq!(request.echo, format!("Content from {url}"));
        assert_eq!(request.source, "url");
        assert_eq!(request.k, 5);
    }
}
