/// Constraint extraction and filtering for recommendations.
///
/// Extraction is ordered pattern matching over the lower-cased query: within each
/// constraint the first pattern (or keyword) in list order wins, even if a later one would
/// match "better". Filtering ANDs every present constraint and never reorders.
use regex::Regex;

use crate::model::{QueryFilters, Recommendation, Support};

/// Duration phrasings, in priority order. Each captures the minute count in group 1.
const DURATION_PATTERNS: &[&str] = &[
    r"(\d+)\s*min",
    r"(\d+)\s*minute",
    r"under\s*(\d+)",
    r"less than\s*(\d+)",
    r"within\s*(\d+)",
    r"max.*?(\d+)",
    r"maximum.*?(\d+)",
];

const REMOTE_PATTERN: &str = r"remote|online|virtual";
const ADAPTIVE_PATTERN: &str = r"adaptive|\birt\b|item response";

/// Test-type keywords, in priority order.
const TEST_TYPES: &[&str] = &[
    "cognitive",
    "personality",
    "behavioral",
    "situational",
    "technical",
    "aptitude",
    "skills",
    "java",
    "python",
    "sql",
    "sales",
    "leadership",
    "management",
    "english",
    "verbal",
    "numerical",
    "reasoning",
];

/// Compiled extractor. Cheap to share; build once and reuse across requests.
pub struct FilterExtractor {
    duration: Vec<Regex>,
    remote: Regex,
    adaptive: Regex,
}

impl Default for FilterExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterExtractor {
    pub fn new() -> Self {
        Self {
            duration: DURATION_PATTERNS
                .iter()
                .map(|p| Regex::new(p).expect("valid regex"))
                .collect(),
            remote: Regex::new(REMOTE_PATTERN).expect("valid regex"),
            adaptive: Regex::new(ADAPTIVE_PATTERN).expect("valid regex"),
        }
    }

    pub fn extract(&self, query: &str) -> QueryFilters {
        let query = query.to_lowercase();

        let duration_limit = self.duration.iter().find_map(|re| {
            re.captures(&query)
                .and_then(|caps| caps.get(1))
                .and_then(|m| m.as_str().parse::<u32>().ok())
        });

        QueryFilters {
            duration_limit,
            remote_testing: self.remote.is_match(&query).then_some(true),
            adaptive_testing: self.adaptive.is_match(&query).then_some(true),
            test_type: TEST_TYPES
                .iter()
                .find(|t| query.contains(*t))
                .map(|t| t.to_string()),
        }
    }
}

/// Apply every present constraint. The result is an order-preserving subset of `results`.
pub fn filter_recommendations(
    results: &[Recommendation],
    filters: &QueryFilters,
) -> Vec<Recommendation> {
    results
        .iter()
        .filter(|rec| matches_filters(rec, filters))
        .cloned()
        .collect()
}

pub fn matches_filters(rec: &Recommendation, filters: &QueryFilters) -> bool {
    // A zero limit means "no limit", same as absent.
    if let Some(limit) = filters.duration_limit.filter(|&l| l > 0) {
        if duration_minutes(&rec.duration).is_some_and(|minutes| minutes > limit) {
            return false;
        }
    }
    if let Some(required) = filters.remote_testing {
        if rec.remote_testing_support != Support::from(required) {
            return false;
        }
    }
    if let Some(required) = filters.adaptive_testing {
        if rec.adaptive_irt_support != Support::from(required) {
            return false;
        }
    }
    if let Some(test_type) = filters.test_type.as_deref().filter(|t| !t.is_empty()) {
        if !rec
            .test_type
            .to_lowercase()
            .contains(&test_type.to_lowercase())
        {
            return false;
        }
    }
    true
}

/// First integer in a free-text duration ("30 minutes", "Approx. 25 min").
///
/// `None` means the duration is unbounded and passes any ceiling. Values too large for a
/// `u32` saturate, so they still exceed every ceiling.
pub fn duration_minutes(duration: &str) -> Option<u32> {
    let start = duration.find(|c: char| c.is_ascii_digit())?;
    let digits: String = duration[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    // Only overflow can fail here: `digits` is a non-empty run of ASCII digits.
    Some(digits.parse().unwrap_or(u32::MAX))
}
