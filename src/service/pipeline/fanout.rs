//! Concurrent search over a query or its sub-queries

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;

use super::classifier::{QueryComplexity, classify};
use super::collaborators::{QueryDecomposer, SearchProvider};
use crate::model::{Document, PipelineConfig};

pub struct SearchFanOut {
    search: Arc<dyn SearchProvider>,
    decomposer: Arc<dyn QueryDecomposer>,
    sub_query_max_results: usize,
    max_sub_queries: usize,
}

impl SearchFanOut {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        decomposer: Arc<dyn QueryDecomposer>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            search,
            decomposer,
            sub_query_max_results: config.sub_query_max_results,
            max_sub_queries: config.max_sub_queries.max(1),
        }
    }

    /// Search for `query`, returning at most `ceiling` unique documents.
    ///
    /// Individual search failures are logged and dropped.
    pub async fn run(&self, query: &str, context: Option<&str>, ceiling: usize) -> Vec<Document> {
        let (queries, per_query_limit) = match classify(query) {
            QueryComplexity::Simple => (vec![query.to_string()], ceiling),
            QueryComplexity::Complex => (
                self.sub_queries(query, context).await,
                self.sub_query_max_results,
            ),
        };

        tracing::info!(
            query = %query,
            searches = queries.len(),
            per_query_limit = per_query_limit,
            ceiling = ceiling,
            "Starting search fan-out"
        );

        let searches = queries
            .iter()
            .map(|q| self.search.search(q, per_query_limit));
        let results = join_all(searches).await;

        let mut batches = Vec::with_capacity(results.len());
        for (sub_query, result) in queries.iter().zip(results) {
            match result {
                Ok(documents) => {
                    tracing::debug!(
                        sub_query = %sub_query,
                        documents = documents.len(),
                        "Search completed"
                    );
                    batches.push(documents);
                }
                Err(e) => {
                    tracing::warn!(
                        sub_query = %sub_query,
                        error = %e.message(),
                        details = ?e.details(),
                        "Search failed, dropping sub-query results"
                    );
                }
            }
        }

        merge_unique(batches, ceiling)
    }

    /// Decompose a complex query, falling back to the query itself
    async fn sub_queries(&self, query: &str, context: Option<&str>) -> Vec<String> {
        let original = query.trim();
        let decomposed = match self.decomposer.decompose(query, context).await {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!(error = %e, "Query decomposition failed, searching original query");
                Vec::new()
            }
        };

        let mut sub_queries: Vec<String> = Vec::new();
        for candidate in decomposed {
            let candidate = candidate.trim();
            let duplicate = sub_queries
                .iter()
                .any(|q| q.eq_ignore_ascii_case(candidate));
            if candidate.is_empty() || duplicate {
                continue;
            }
            sub_queries.push(candidate.to_string());
            if sub_queries.len() == self.max_sub_queries {
                break;
            }
        }

        match sub_queries.len() {
            0 => vec![original.to_string()],
            1 if !sub_queries[0].eq_ignore_ascii_case(original) && self.max_sub_queries > 1 => {
                sub_queries.push(original.to_string());
                sub_queries
            }
            _ => sub_queries,
        }
    }
}

/// Concatenate batches keeping the first document seen for each URL
pub fn merge_unique(batches: Vec<Vec<Document>>, ceiling: usize) -> Vec<Document> {
    let mut seen = HashSet::new();
    batches
        .into_iter()
        .flatten()
        .filter(|doc| seen.insert(doc.url.as_str().to_string()))
        .take(ceiling)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use url::Url;

    use super::*;
    use crate::model::DocumentMetadata;
    use crate::service::pipeline::error::{GenerationError, SearchError};

    fn doc(url: &str, title: &str) -> Document {
        Document {
            url: Url::parse(url).unwrap(),
            title: title.to_string(),
            content: format!("content of {}", title),
            excerpt: format!("excerpt of {}", title),
            fetched_at: Utc::now(),
            metadata: DocumentMetadata {
                source: "test".to_string(),
                query: String::new(),
                rank: 0,
            },
        }
    }

    #[derive(Default)]
    struct RecordingSearch {
        calls: Mutex<Vec<(String, usize)>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl SearchProvider for RecordingSearch {
        async fn search(
            &self,
            query: &str,
            max_results: usize,
        ) -> Result<Vec<Document>, SearchError> {
            self.calls
                .lock()
                .unwrap()
                .push((query.to_string(), max_results));
            if self.fail_on.as_deref() == Some(query) {
                return Err(SearchError::backend("boom", None));
            }
            Ok(vec![
                doc("https://shared.example/", &format!("shared via {}", query)),
                doc(&format!("https://example.com/{}", query.len()), query),
            ])
        }
    }

    struct FixedDecomposer(Result<Vec<String>, ()>);

    #[async_trait]
    impl QueryDecomposer for FixedDecomposer {
        async fn decompose(
            &self,
            _query: &str,
            _context: Option<&str>,
        ) -> Result<Vec<String>, GenerationError> {
            self.0
                .clone()
                .map_err(|_| GenerationError::backend("decomposition unavailable", None))
        }
    }

    fn fan_out(search: Arc<RecordingSearch>, decomposer: FixedDecomposer) -> SearchFanOut {
        SearchFanOut::new(search, Arc::new(decomposer), &PipelineConfig::default())
    }

    #[tokio::test]
    async fn test_simple_query_issues_one_search() {
        let search = Arc::new(RecordingSearch::default());
        let fan_out = fan_out(search.clone(), FixedDecomposer(Ok(vec!["unused".into()])));

        let docs = fan_out.run("What is GGML?", None, 10).await;

        assert_eq!(docs.len(), 2);
        assert_eq!(
            *search.calls.lock().unwrap(),
            vec![("What is GGML?".to_string(), 10)]
        );
    }

    #[tokio::test]
    async fn test_complex_query_searches_each_sub_query() {
        let search = Arc::new(RecordingSearch::default());
        let fan_out = fan_out(
            search.clone(),
            FixedDecomposer(Ok(vec![
                "what is machine learning".into(),
                "GGML library".into(),
                "GGML machine learning relation".into(),
                "a fourth one".into(),
            ])),
        );

        let query = "What is machine learning and how does it relate to GGML?";
        let docs = fan_out.run(query, None, 10).await;

        let calls = search.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|(_, limit)| *limit == 5));

        let shared: Vec<_> = docs
            .iter()
            .filter(|d| d.url.as_str() == "https://shared.example/")
            .collect();
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].title, "shared via what is machine learning");
    }

    #[tokio::test]
    async fn test_single_sub_query_also_searches_original() {
        let search = Arc::new(RecordingSearch::default());
        let decomposer = FixedDecomposer(Ok(vec!["GGML overview".into()]));
        let fan_out = fan_out(search.clone(), decomposer);

        fan_out.run("GGML and llama.cpp", None, 10).await;

        let queries: Vec<String> = search
            .calls
            .lock()
            .unwrap()
            .iter()
            .map(|(q, _)| q.clone())
            .collect();
        assert_eq!(queries, vec!["GGML overview", "GGML and llama.cpp"]);
    }

    #[tokio::test]
    async fn test_decomposition_failure_falls_back_to_query() {
        let search = Arc::new(RecordingSearch::default());
        let fan_out = fan_out(search.clone(), FixedDecomposer(Err(())));

        let docs = fan_out.run("tokio vs smol", None, 10).await;

        assert_eq!(docs.len(), 2);
        assert_eq!(search.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_sub_search_is_dropped() {
        let search = Arc::new(RecordingSearch {
            fail_on: Some("GGML library".to_string()),
            ..Default::default()
        });
        let fan_out = fan_out(
            search.clone(),
            FixedDecomposer(Ok(vec!["GGML library".into(), "tensor formats".into()])),
        );

        let docs = fan_out.run("GGML and tensors", None, 10).await;

        assert_eq!(search.calls.lock().unwrap().len(), 2);
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].title, "shared via tensor formats");
    }

    #[test]
    fn test_merge_unique_first_seen_wins_and_truncates() {
        let merged = merge_unique(
            vec![
                vec![doc("https://a.example/", "first"), doc("https://b.example/", "b")],
                vec![doc("https://a.example/", "second"), doc("https://c.example/", "c")],
            ],
            2,
        );

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].title, "first");
        assert_eq!(merged[1].url.as_str(), "https://b.example/");
    }
}
