/// Offline evaluation of recommendation quality.
///
/// Scores ranked recommendation lists against a fixed ground-truth set with precision@k,
/// recall@k and average precision@k, then averages over every query that has both ground
/// truth and at least one recommendation. Titles are compared only after
/// [`normalize_title`], on both sides.
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::model::normalize_title;
use crate::search::RecommendationEngine;
use recommender_common::embedding::TextEmbedder;

const DEFAULT_TEST_DATA: &str = include_str!("../data/default_test_data.json");
pub const RESULTS_FILE_NAME: &str = "evaluation_results.json";
pub const DEFAULT_K_VALUES: &[usize] = &[3, 5, 10];

/// Queries and the catalog titles judged relevant for each.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestData {
    pub queries: Vec<String>,
    pub ground_truth: BTreeMap<String, Vec<String>>,
}

impl TestData {
    pub fn builtin() -> Result<Self, AppError> {
        serde_json::from_str(DEFAULT_TEST_DATA)
            .map_err(|e| AppError::Evaluation(format!("built-in test data is invalid: {e}")))
    }
}

/// Load test data from `path`, writing the built-in set there first if it is missing.
pub fn load_or_create_test_data(path: &Path) -> Result<TestData, AppError> {
    if path.exists() {
        let content = std::fs::read_to_string(path).map_err(|e| AppError::io(path, e))?;
        let data: TestData = serde_json::from_str(&content).map_err(|e| {
            AppError::Evaluation(format!("invalid test data in {}: {e}", path.display()))
        })?;
        info!(path = %path.display(), queries = data.queries.len(), "loaded test data");
        return Ok(data);
    }

    let data = TestData::builtin()?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| AppError::io(parent, e))?;
    }
    let json = serde_json::to_string_pretty(&data)
        .map_err(|e| AppError::Evaluation(format!("serializing test data failed: {e}")))?;
    std::fs::write(path, json).map_err(|e| AppError::io(path, e))?;
    info!(path = %path.display(), queries = data.queries.len(), "created default test data");
    Ok(data)
}

/// Ranks (1-based) within the top `k` at which a not-yet-seen relevant title appears.
///
/// Repeats of an already-counted title don't count again, so the hit count never exceeds
/// the number of distinct relevant titles.
fn relevant_hit_ranks(recommended: &[String], relevant: &[String], k: usize) -> Vec<usize> {
    let relevant: HashSet<String> = relevant.iter().map(|t| normalize_title(t)).collect();
    let mut seen = HashSet::new();
    recommended
        .iter()
        .take(k)
        .enumerate()
        .filter_map(|(i, title)| {
            let norm = normalize_title(title);
            (relevant.contains(&norm) && seen.insert(norm)).then_some(i + 1)
        })
        .collect()
}

fn distinct_relevant(relevant: &[String]) -> usize {
    relevant
        .iter()
        .map(|t| normalize_title(t))
        .collect::<HashSet<_>>()
        .len()
}

/// Relevant items in the top `k`, divided by `k`.
pub fn precision_at_k(recommended: &[String], relevant: &[String], k: usize) -> f64 {
    if recommended.is_empty() || k == 0 {
        return 0.0;
    }
    relevant_hit_ranks(recommended, relevant, k).len() as f64 / k as f64
}

/// Relevant items in the top `k`, divided by the number of relevant items.
pub fn recall_at_k(recommended: &[String], relevant: &[String], k: usize) -> f64 {
    let total = distinct_relevant(relevant);
    if recommended.is_empty() || total == 0 || k == 0 {
        return 0.0;
    }
    relevant_hit_ranks(recommended, relevant, k).len() as f64 / total as f64
}

/// Mean of precision at each relevant rank, normalized by `min(|relevant|, k)`.
pub fn average_precision_at_k(recommended: &[String], relevant: &[String], k: usize) -> f64 {
    let total = distinct_relevant(relevant);
    if recommended.is_empty() || total == 0 || k == 0 {
        return 0.0;
    }
    let ranks = relevant_hit_ranks(recommended, relevant, k);
    if ranks.is_empty() {
        return 0.0;
    }
    let sum: f64 = ranks
        .iter()
        .enumerate()
        .map(|(hits_before, &rank)| (hits_before + 1) as f64 / rank as f64)
        .sum();
    sum / total.min(k) as f64
}

/// How recommendation lists are produced for evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingMode {
    /// Plain similarity search.
    #[default]
    Similarity,
    /// Similarity search plus query-derived constraint filtering.
    AutoFilter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryEvaluation {
    pub query: String,
    pub recommended_titles: Vec<String>,
    pub relevant_items: Vec<String>,
    pub metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResults {
    pub k_values: Vec<usize>,
    pub mode: RankingMode,
    pub valid_queries: usize,
    pub overall: BTreeMap<String, f64>,
    pub per_query: BTreeMap<String, QueryEvaluation>,
}

impl EvaluationResults {
    fn empty(k_values: &[usize], mode: RankingMode) -> Self {
        let mut overall = BTreeMap::new();
        for k in k_values {
            overall.insert(format!("mean_precision@{k}"), 0.0);
            overall.insert(format!("mean_recall@{k}"), 0.0);
            overall.insert(format!("map@{k}"), 0.0);
        }
        Self {
            k_values: k_values.to_vec(),
            mode,
            valid_queries: 0,
            overall,
            per_query: BTreeMap::new(),
        }
    }

    /// Write the results as pretty JSON into `dir`, returning the file path.
    pub fn save(&self, dir: &Path) -> Result<PathBuf, AppError> {
        std::fs::create_dir_all(dir).map_err(|e| AppError::io(dir, e))?;
        let path = dir.join(RESULTS_FILE_NAME);
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| AppError::Evaluation(format!("serializing results failed: {e}")))?;
        std::fs::write(&path, json).map_err(|e| AppError::io(&path, e))?;
        info!(path = %path.display(), "evaluation results saved");
        Ok(path)
    }
}

fn sanitize_k_values(k_values: &[usize]) -> Result<Vec<usize>, AppError> {
    let mut ks: Vec<usize> = k_values.iter().copied().filter(|&k| k > 0).collect();
    ks.sort_unstable();
    ks.dedup();
    if ks.is_empty() {
        return Err(AppError::Evaluation(
            "at least one positive k value is required".to_string(),
        ));
    }
    Ok(ks)
}

/// Score every test query, fetching each ranked title list from `rank`.
///
/// `rank` is asked for `max(k_values)` titles per query.
pub async fn evaluate_with<F, Fut>(
    test_data: &TestData,
    k_values: &[usize],
    mode: RankingMode,
    mut rank: F,
) -> Result<EvaluationResults, AppError>
where
    F: FnMut(String, usize) -> Fut,
    Fut: Future<Output = Vec<String>>,
{
    let ks = sanitize_k_values(k_values)?;
    let max_k = ks[ks.len() - 1];
    let mut results = EvaluationResults::empty(&ks, mode);

    if test_data.queries.is_empty() || test_data.ground_truth.is_empty() {
        warn!("no test data available for evaluation");
        return Ok(results);
    }

    let mut sums: BTreeMap<String, f64> = BTreeMap::new();
    for query in &test_data.queries {
        let preview: String = query.chars().take(50).collect();
        let Some(relevant) = test_data.ground_truth.get(query).filter(|gt| !gt.is_empty()) else {
            warn!(query = %preview, "no ground truth for query, skipping");
            continue;
        };

        let recommended = rank(query.clone(), max_k).await;
        if recommended.is_empty() {
            warn!(query = %preview, "no recommendations returned, skipping");
            continue;
        }

        let mut metrics = BTreeMap::new();
        for &k in &ks {
            metrics.insert(format!("precision@{k}"), precision_at_k(&recommended, relevant, k));
            metrics.insert(format!("recall@{k}"), recall_at_k(&recommended, relevant, k));
            metrics.insert(format!("ap@{k}"), average_precision_at_k(&recommended, relevant, k));
        }
        for (name, value) in &metrics {
            *sums.entry(name.clone()).or_default() += value;
        }

        for title in recommended.iter().take(max_k) {
            debug!(
                title = %title,
                normalized = %normalize_title(title),
                relevant = relevant_hit_ranks(std::slice::from_ref(title), relevant, 1).len() == 1,
                "recommended title"
            );
        }
        info!(query = %preview, ?metrics, "query evaluated");

        results.valid_queries += 1;
        results.per_query.insert(
            query.clone(),
            QueryEvaluation {
                query: query.clone(),
                recommended_titles: recommended,
                relevant_items: relevant.clone(),
                metrics,
            },
        );
    }

    if results.valid_queries > 0 {
        let n = results.valid_queries as f64;
        for &k in &ks {
            let mean = |name: &str| sums.get(name).copied().unwrap_or(0.0) / n;
            results
                .overall
                .insert(format!("mean_precision@{k}"), mean(&format!("precision@{k}")));
            results
                .overall
                .insert(format!("mean_recall@{k}"), mean(&format!("recall@{k}")));
            results.overall.insert(format!("map@{k}"), mean(&format!("ap@{k}")));
        }
    }

    info!(
        valid_queries = results.valid_queries,
        overall = ?results.overall,
        "evaluation complete"
    );
    Ok(results)
}

/// Evaluate the engine against `test_data`.
pub async fn evaluate<E: TextEmbedder>(
    engine: &RecommendationEngine<E>,
    test_data: &TestData,
    k_values: &[usize],
    mode: RankingMode,
) -> Result<EvaluationResults, AppError> {
    evaluate_with(test_data, k_values, mode, |query, k| async move {
        let recs = match mode {
            RankingMode::Similarity => engine.recommend(&query, k).await,
            RankingMode::AutoFilter => engine.recommend_with_auto_filter(&query, k).await,
        };
        recs.into_iter().map(|r| r.title).collect()
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use crate::test_support::engine_with_index;

    fn titles(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn normalization_strips_suffix_and_case() {
        assert_eq!(
            normalize_title("Core Java (Entry Level) (New) | SHL"),
            normalize_title("Core Java (Entry Level) (New)")
        );
        assert_eq!(
            normalize_title("  Core   Java (Entry Level)  (New)|shl "),
            "core java (entry level) (new)"
        );
        assert_eq!(normalize_title("Verify | SHL | SHL"), "verify");
        // Only a trailing suffix is removed.
        assert_eq!(normalize_title("SHL Verify Interactive"), "shl verify interactive");
    }

    #[test]
    fn normalization_is_idempotent() {
        for title in [
            "Core Java (Entry Level) (New) | SHL",
            "General Entry Level – Data Entry 7.0 Solution | SHL",
            "Verify | SHL | SHL",
            "  spaced\tout |  SHL  ",
            "",
            "| SHL",
        ] {
            let once = normalize_title(title);
            assert_eq!(normalize_title(&once), once, "not idempotent for {title:?}");
        }
    }

    #[test]
    fn metrics_on_known_ranking() {
        let relevant = titles(&["A | SHL", "B | SHL", "C | SHL", "D | SHL"]);
        let recommended = titles(&["A", "X", "B", "Y", "Z"]);

        assert!((precision_at_k(&recommended, &relevant, 3) - 2.0 / 3.0).abs() < 1e-12);
        assert!((recall_at_k(&recommended, &relevant, 3) - 0.5).abs() < 1e-12);
        // (1/1 + 2/3) / min(4, 3)
        let expected_ap = (1.0 + 2.0 / 3.0) / 3.0;
        assert!((average_precision_at_k(&recommended, &relevant, 3) - expected_ap).abs() < 1e-12);

        // Precision divides by k even when fewer than k items were recommended.
        assert!((precision_at_k(&recommended, &relevant, 10) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn full_recall_when_everything_is_found() {
        let relevant = titles(&["Java 8 (New) | SHL", "Core Java (Entry Level) (New) | SHL"]);
        let recommended = titles(&["Core Java (Entry Level) (New)", "Other", "Java 8 (New)"]);
        assert_eq!(recall_at_k(&recommended, &relevant, 3), 1.0);
        assert_eq!(recall_at_k(&recommended, &relevant, 5), 1.0);
        assert!(recall_at_k(&recommended, &relevant, 2) < 1.0);
    }

    #[test]
    fn duplicates_do_not_inflate_metrics() {
        let relevant = titles(&["A"]);
        let recommended = titles(&["A", "a | SHL", "A"]);
        assert_eq!(recall_at_k(&recommended, &relevant, 3), 1.0);
        assert!((precision_at_k(&recommended, &relevant, 3) - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(average_precision_at_k(&recommended, &relevant, 3), 1.0);
    }

    #[test]
    fn metrics_stay_in_unit_interval() {
        let relevant = titles(&["A", "B", "C"]);
        let lists = [
            titles(&[]),
            titles(&["A"]),
            titles(&["X", "Y", "Z"]),
            titles(&["C", "B", "A", "A", "B"]),
            titles(&["A", "B", "C", "D", "E", "F"]),
        ];
        for list in &lists {
            for k in 0..8 {
                for value in [
                    precision_at_k(list, &relevant, k),
                    recall_at_k(list, &relevant, k),
                    average_precision_at_k(list, &relevant, k),
                ] {
                    assert!((0.0..=1.0).contains(&value), "{value} out of range for {list:?} @{k}");
                }
            }
        }
        assert_eq!(recall_at_k(&titles(&["A"]), &[], 3), 0.0);
    }

    #[tokio::test]
    async fn aggregates_only_valid_queries() {
        let mut ground_truth = BTreeMap::new();
        ground_truth.insert("q1".to_string(), titles(&["A | SHL", "B | SHL"]));
        ground_truth.insert("q2".to_string(), titles(&["C | SHL"]));
        ground_truth.insert("q4".to_string(), titles(&[]));
        let data = TestData {
            queries: titles(&["q1", "q2", "q3", "q4"]),
            ground_truth,
        };

        let results = evaluate_with(&data, &[1, 3, 1, 0], RankingMode::Similarity, |q, _k| async move {
            match q.as_str() {
                "q1" => titles(&["A", "X", "B"]),
                "q3" => titles(&["A"]),
                // q2 gets nothing back, so it is skipped.
                _ => Vec::new(),
            }
        })
        .await
        .unwrap();

        assert_eq!(results.k_values, vec![1, 3]);
        assert_eq!(results.valid_queries, 1);
        assert_eq!(results.per_query.len(), 1);
        assert_eq!(results.overall["mean_precision@1"], 1.0);
        assert_eq!(results.overall["mean_recall@3"], 1.0);
        assert!((results.overall["map@3"] - (1.0 + 2.0 / 3.0) / 2.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn rejects_empty_k_values() {
        let data = TestData::builtin().unwrap();
        let err = evaluate_with(&data, &[0], RankingMode::Similarity, |_q, _k| async { Vec::new() })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("k value"));
    }

    #[tokio::test]
    async fn no_test_data_yields_zeroed_results() {
        let results = evaluate_with(&TestData::default(), DEFAULT_K_VALUES, RankingMode::Similarity, |_q, _k| async {
            titles(&["A"])
        })
        .await
        .unwrap();
        assert_eq!(results.valid_queries, 0);
        assert_eq!(results.overall.len(), 9);
        assert!(results.overall.values().all(|v| *v == 0.0));
    }

    #[test]
    fn test_data_is_created_then_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("test_data.json");

        let created = load_or_create_test_data(&path).unwrap();
        assert_eq!(created.queries.len(), 6);
        assert!(path.exists());
        assert_eq!(load_or_create_test_data(&path).unwrap(), created);

        std::fs::write(&path, "[]").unwrap();
        assert!(load_or_create_test_data(&path).is_err());
    }

    #[test]
    fn builtin_ground_truth_covers_every_query() {
        let data = TestData::builtin().unwrap();
        for q in &data.queries {
            assert!(data.ground_truth.get(q).is_some_and(|gt| !gt.is_empty()));
        }
    }

    #[tokio::test]
    async fn evaluates_engine_end_to_end() {
        let records = catalog::fallback_catalog().unwrap();
        let (engine, _dir) = engine_with_index(&records).await;
        let data = TestData::builtin().unwrap();

        for mode in [RankingMode::Similarity, RankingMode::AutoFilter] {
            let results = evaluate(&engine, &data, DEFAULT_K_VALUES, mode).await.unwrap();
            assert_eq!(results.valid_queries, data.queries.len());
            for value in results.overall.values() {
                assert!((0.0..=1.0).contains(value));
            }
            for per_query in results.per_query.values() {
                assert!(per_query.recommended_titles.len() <= 10);
            }
        }

        let out = tempfile::tempdir().unwrap();
        let results = evaluate(&engine, &data, &[3], RankingMode::Similarity).await.unwrap();
        let path = results.save(out.path()).unwrap();
        let saved: EvaluationResults =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(saved, results);
    }
}
