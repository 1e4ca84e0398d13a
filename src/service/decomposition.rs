//! Query decomposition using LLM structured extraction

use async_trait::async_trait;

use crate::model::ExtractedSubQueries;
use crate::service::LlmClient;
use crate::service::pipeline::{GenerationError, QueryDecomposer};

const MAX_SUB_QUERIES: usize = 3;
/// Sub-queries this short are not useful searches
const MIN_SUB_QUERY_CHARS: usize = 5;
const CONTEXT_CHARS: usize = 1000;

/// System prompt for query decomposition
const DECOMPOSITION_SYSTEM_PROMPT: &str = "You are a query decomposition expert. Break complex \
questions into 2-3 simpler, self-contained web search queries. Use the provided conversation \
context to resolve references such as pronouns, but do not answer the question.";

fn build_decomposition_prompt(query: &str, context: Option<&str>) -> String {
    let context = context
        .map(|c| c.chars().take(CONTEXT_CHARS).collect::<String>())
        .unwrap_or_default();
    format!(
        r#"Given context:
{context}

Break the query below into simpler sub-questions:
{query}

Return the sub-questions in `sub_queries`, most important first."#
    )
}

/// Strip list numbering or bullets a model may leave on an entry
fn strip_list_marker(entry: &str) -> &str {
    let trimmed = entry.trim();
    let without_digits = trimmed.trim_start_matches(|c: char| c.is_ascii_digit());
    let stripped = if without_digits.len() < trimmed.len() {
        without_digits
            .strip_prefix('.')
            .or_else(|| without_digits.strip_prefix(')'))
            .unwrap_or(trimmed)
    } else {
        trimmed
            .strip_prefix("- ")
            .or_else(|| trimmed.strip_prefix("* "))
            .unwrap_or(trimmed)
    };
    stripped.trim()
}

/// Clean extracted sub-queries: strip markers, drop short entries, cap the count
pub fn normalize_sub_queries(raw: Vec<String>) -> Vec<String> {
    raw.iter()
        .map(|q| strip_list_marker(q))
        .filter(|q| q.chars().count() > MIN_SUB_QUERY_CHARS)
        .take(MAX_SUB_QUERIES)
        .map(str::to_string)
        .collect()
}

/// Decomposes complex queries through rig structured extraction
pub struct QueryDecompositionService {
    llm_client: LlmClient,
    model: String,
}

impl QueryDecompositionService {
    pub fn new(llm_client: LlmClient, model: impl Into<String>) -> Self {
        let model = model.into();
        tracing::info!(model = %model, "Query decomposition service initialized");
        Self { llm_client, model }
    }
}

#[async_trait]
impl QueryDecomposer for QueryDecompositionService {
    async fn decompose(
        &self,
        query: &str,
        context: Option<&str>,
    ) -> Result<Vec<String>, GenerationError> {
        let start_time = std::time::Instant::now();
        let prompt = build_decomposition_prompt(query, context);

        let extractor = self
            .llm_client
            .openai_client()
            .extractor::<ExtractedSubQueries>(&self.model)
            .preamble(DECOMPOSITION_SYSTEM_PROMPT)
            .additional_params(serde_json::json!({
                "temperature": 0.1
            }))
            .build();

        let extracted = extractor.extract(&prompt).await.map_err(|e| {
            GenerationError::backend(
                format!("Query decomposition failed: {}", e),
                Some(serde_json::json!({ "model": self.model })),
            )
        })?;

        let sub_queries = normalize_sub_queries(extracted.sub_queries);
        tracing::info!(
            query = %query,
            sub_queries = ?sub_queries,
            elapsed_ms = start_time.elapsed().as_millis(),
            "Query decomposed"
        );

        if sub_queries.is_empty() {
            return Ok(vec![query.to_string()]);
        }
        Ok(sub_queries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_numbering_and_short_entries() {
        let raw = vec![
            "1. What is GGML?".to_string(),
            "2) ggml vs llama.cpp".to_string(),
            "- who".to_string(),
            "* How does quantization work".to_string(),
            "What hardware runs it".to_string(),
        ];

        assert_eq!(
            normalize_sub_queries(raw),
            vec![
                "What is GGML?".to_string(),
                "ggml vs llama.cpp".to_string(),
                "How does quantization work".to_string(),
            ]
        );
    }

    #[test]
    fn test_leading_year_is_not_a_marker() {
        assert_eq!(
            strip_list_marker("2024 model releases"),
            "2024 model releases"
        );
        assert_eq!(strip_list_marker("  plain query "), "plain query");
    }

    #[test]
    fn test_prompt_includes_context() {
        let prompt = build_decomposition_prompt("compare a and b", Some("user: earlier"));
        assert!(prompt.contains("user: earlier"));
        assert!(prompt.contains("compare a and b"));
    }
}
