use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

/// Yes/No capability flag as it appears in the catalog.
///
/// Anything other than a case-insensitive "yes"/"true" reads as `No`, matching how the
/// catalog treats absent or unknown values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, JsonSchema)]
pub enum Support {
    Yes,
    #[default]
    No,
}

impl Support {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Yes => "Yes",
            Self::No => "No",
        }
    }
}

impl From<bool> for Support {
    fn from(value: bool) -> Self {
        if value {
            Self::Yes
        } else {
            Self::No
        }
    }
}

impl From<&str> for Support {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "yes" | "true" | "y" => Self::Yes,
            _ => Self::No,
        }
    }
}

impl<'de> Deserialize<'de> for Support {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from(raw.as_str()))
    }
}

impl fmt::Display for Support {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn not_available() -> String {
    "N/A".to_string()
}

/// One catalogued assessment product. `title` is the unique key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentRecord {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub remote_testing_support: Support,
    #[serde(default)]
    pub adaptive_irt_support: Support,
    #[serde(default = "not_available")]
    pub duration: String,
    #[serde(default = "not_available")]
    pub test_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub features: Vec<String>,
}

/// A search hit: the display metadata stored alongside each indexed vector, plus the
/// cosine similarity to the query (higher is closer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Recommendation {
    pub title: String,
    pub url: String,
    pub remote_testing_support: Support,
    pub adaptive_irt_support: Support,
    pub duration: String,
    pub test_type: String,
    pub similarity_score: f32,
}

impl Recommendation {
    #[cfg(test)]
    pub fn from_record(record: &AssessmentRecord, similarity_score: f32) -> Self {
        Self {
            title: record.title.clone(),
            url: record.url.clone(),
            remote_testing_support: record.remote_testing_support,
            adaptive_irt_support: record.adaptive_irt_support,
            duration: record.duration.clone(),
            test_type: record.test_type.clone(),
            similarity_score,
        }
    }
}

/// Constraints pulled out of a free-text query. Every field is optional; absent means
/// "don't filter on this".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct QueryFilters {
    /// Maximum assessment length in minutes.
    pub duration_limit: Option<u32>,
    pub remote_testing: Option<bool>,
    pub adaptive_testing: Option<bool>,
    /// Case-insensitive fragment that must appear in the assessment's test type.
    pub test_type: Option<String>,
}

/// Canonical form of an assessment title for comparison.
///
/// Case-folds, collapses whitespace, and strips any trailing `| SHL` catalog suffix.
/// Idempotent. Every place that compares titles goes through this.
pub fn normalize_title(title: &str) -> String {
    static SUFFIX: OnceLock<Regex> = OnceLock::new();
    let suffix_re = SUFFIX.get_or_init(|| Regex::new(r"(?:\s*\|\s*shl)+$").expect("valid regex"));
    let lowered = title.to_lowercase();
    let collapsed = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
    suffix_re.replace(&collapsed, "").trim().to_string()
}
