use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use url::Url;

/// Clamp a score into `[0, 1]`, mapping non-finite values to zero.
pub fn clamp_unit(score: f32) -> f32 {
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Truncate to at most `max_chars` characters, appending "..." when anything was cut.
pub fn ellipsize(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

/// Where a document came from and how it ranked in the search that found it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub source: String,
    pub query: String,
    pub rank: usize,
}

/// A fetched web page. Identity is `url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub url: Url,
    pub title: String,
    pub content: String,
    pub excerpt: String,
    pub fetched_at: DateTime<Utc>,
    pub metadata: DocumentMetadata,
}

/// A scored span of document text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    pub source_url: Url,
    pub source_title: String,
    pub relevance_score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Passage {
    pub fn new(text: impl Into<String>, source: &Document, relevance_score: f32) -> Self {
        Self {
            text: text.into(),
            source_url: source.url.clone(),
            source_title: source.title.clone(),
            relevance_score: clamp_unit(relevance_score),
            embedding: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// LLM-extractable query decomposition
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExtractedSubQueries {
    /// Focused web search queries, most important first
    pub sub_queries: Vec<String>,
}
