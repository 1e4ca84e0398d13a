//! Passage retrieval with a local excerpt fallback

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use super::collaborators::PassageRetriever;
use super::error::RetrievalError;
use crate::model::search::clamp_unit;
use crate::model::{Document, Passage};

const FALLBACK_CONTENT_CHARS: usize = 500;
const FALLBACK_RELEVANCE: f32 = 1.0;

pub struct RetrievalStage {
    retriever: Arc<dyn PassageRetriever>,
    timeout: Duration,
}

impl RetrievalStage {
    pub fn new(retriever: Arc<dyn PassageRetriever>, timeout: Duration) -> Self {
        Self { retriever, timeout }
    }

    /// Rank passages for `query`, degrading to document excerpts when retrieval fails
    pub async fn run(
        &self,
        query: &str,
        documents: &[Document],
        max_passages: usize,
    ) -> Vec<Passage> {
        let start_time = std::time::Instant::now();
        let outcome = tokio::time::timeout(
            self.timeout,
            self.retriever.retrieve(query, documents, max_passages),
        )
        .await
        .unwrap_or(Err(RetrievalError::Timeout(self.timeout)));

        match outcome {
            Ok(passages) => {
                let passages = sanitize(passages, documents, max_passages);
                tracing::info!(
                    passages = passages.len(),
                    elapsed_ms = start_time.elapsed().as_millis(),
                    "Retrieval completed"
                );
                passages
            }
            Err(e) => {
                let passages = fallback_passages(documents, max_passages);
                tracing::warn!(
                    error = %e.message(),
                    details = ?e.details(),
                    fallback_passages = passages.len(),
                    elapsed_ms = start_time.elapsed().as_millis(),
                    "Retrieval failed, using document excerpts"
                );
                passages
            }
        }
    }
}

/// Excerpt-based passages for the first `max_passages` documents
pub fn fallback_passages(documents: &[Document], max_passages: usize) -> Vec<Passage> {
    documents
        .iter()
        .take(max_passages)
        .filter_map(|doc| {
            let text = if doc.excerpt.trim().is_empty() {
                doc.content.chars().take(FALLBACK_CONTENT_CHARS).collect()
            } else {
                doc.excerpt.clone()
            };
            if text.trim().is_empty() {
                None
            } else {
                Some(Passage::new(text, doc, FALLBACK_RELEVANCE))
            }
        })
        .collect()
}

/// Clamp scores, drop passages citing unknown documents and enforce the limit
fn sanitize(passages: Vec<Passage>, documents: &[Document], max_passages: usize) -> Vec<Passage> {
    let known: HashSet<&str> = documents.iter().map(|d| d.url.as_str()).collect();
    passages
        .into_iter()
        .filter(|p| {
            let known_source = known.contains(p.source_url.as_str());
            if !known_source {
                tracing::debug!(source_url = %p.source_url, "Dropping passage with unknown source");
            }
            known_source
        })
        .map(|mut p| {
            p.relevance_score = clamp_unit(p.relevance_score);
            p
        })
        .take(max_passages)
        .collect()
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Utc;
    use url::Url;

    use super::*;
    use crate::model::DocumentMetadata;

    fn doc(url: &str, excerpt: &str, content: &str) -> Document {
        Document {
            url: Url::parse(url).unwrap(),
            title: url.to_string(),
            content: content.to_string(),
            excerpt: excerpt.to_string(),
            fetched_at: Utc::now(),
            metadata: DocumentMetadata {
                source: "test".to_string(),
                query: "q".to_string(),
                rank: 0,
            },
        }
    }

    fn documents() -> Vec<Document> {
        vec![
            doc("https://a.example/", "excerpt a", "content a"),
            doc("https://b.example/", "", &"b".repeat(800)),
            doc("https://c.example/", "  ", ""),
            doc("https://d.example/", "excerpt d", "content d"),
        ]
    }

    enum Behaviour {
        Fail,
        Hang,
        Return(Vec<Passage>),
    }

    struct FakeRetriever(Behaviour);

    #[async_trait]
    impl PassageRetriever for FakeRetriever {
        async fn retrieve(
            &self,
            _query: &str,
            _documents: &[Document],
            _max: usize,
        ) -> Result<Vec<Passage>, RetrievalError> {
            match &self.0 {
                Behaviour::Fail => Err(RetrievalError::embedding("model unavailable", None)),
                Behaviour::Hang => {
                    std::future::pending::<()>().await;
                    Ok(vec![])
                }
                Behaviour::Return(passages) => Ok(passages.clone()),
            }
        }
    }

    fn stage(behaviour: Behaviour) -> RetrievalStage {
        let retriever = Arc::new(FakeRetriever(behaviour));
        RetrievalStage::new(retriever, Duration::from_secs(15))
    }

    #[test]
    fn test_fallback_uses_excerpt_or_content_prefix() {
        let passages = fallback_passages(&documents(), 3);

        assert_eq!(passages.len(), 2);
        assert_eq!(passages[0].text, "excerpt a");
        assert_eq!(passages[1].text.chars().count(), FALLBACK_CONTENT_CHARS);
        assert!(passages.iter().all(|p| p.relevance_score == 1.0));
    }

    #[test]
    fn test_fallback_is_idempotent() {
        let docs = documents();
        assert_eq!(fallback_passages(&docs, 4), fallback_passages(&docs, 4));
        assert!(fallback_passages(&[], 4).is_empty());
    }

    #[tokio::test]
    async fn test_failure_degrades_to_fallback() {
        let stage = stage(Behaviour::Fail);
        let passages = stage.run("q", &documents(), 2).await;

        assert_eq!(passages.len(), 2);
        assert_eq!(passages[0].source_url.as_str(), "https://a.example/");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_degrades_to_fallback() {
        let stage = stage(Behaviour::Hang);
        let passages = stage.run("q", &documents(), 6).await;

        assert_eq!(passages, fallback_passages(&documents(), 6));
    }

    #[tokio::test]
    async fn test_orphan_passages_are_dropped_and_scores_clamped() {
        let docs = documents();
        let mut orphan = Passage::new("orphan", &docs[0], 0.5);
        orphan.source_url = Url::parse("https://elsewhere.example/").unwrap();
        let mut loud = Passage::new("loud", &docs[3], 0.5);
        loud.relevance_score = 3.0;

        let stage = stage(Behaviour::Return(vec![orphan, loud]));
        let passages = stage.run("q", &docs, 6).await;

        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].text, "loud");
        assert_eq!(passages[0].relevance_score, 1.0);
    }
}
