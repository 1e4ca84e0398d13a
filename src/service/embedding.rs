//! Embedding-based passage retrieval

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::OnceCell;

use crate::model::{Document, Passage};
use crate::service::LlmClient;
use crate::service::pipeline::{PassageRetriever, RetrievalError};

const CHUNK_CHARS: usize = 500;
const CHUNK_OVERLAP: usize = 50;
const MAX_CHUNKS_PER_DOCUMENT: usize = 10;
const MAX_TOTAL_CHUNKS: usize = 30;

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity clamped to `[0, 1]`; zero vectors score zero
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let norms = l2_norm(a) * l2_norm(b);
    if norms == 0.0 || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    crate::model::search::clamp_unit(dot / norms)
}

/// Split text into overlapping chunks, preferring paragraph, then line, then word breaks
pub fn chunk_text(text: &str, max_chunks: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() && chunks.len() < max_chunks {
        let mut end = (start + CHUNK_CHARS).min(chars.len());

        if end < chars.len() {
            let window_start = start + CHUNK_CHARS / 2;
            let window = &chars[window_start..end];
            let paragraph = window
                .windows(2)
                .rposition(|w| w == ['\n', '\n'])
                .map(|p| p + 2);
            let line = || window.iter().rposition(|c| *c == '\n').map(|p| p + 1);
            let word = || window.iter().rposition(|c| c.is_whitespace()).map(|p| p + 1);
            if let Some(offset) = paragraph.or_else(line).or_else(word) {
                end = window_start + offset;
            }
        }

        let chunk: String = chars[start..end].iter().collect();
        let chunk = chunk.trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }

        if end >= chars.len() {
            break;
        }
        start = end.saturating_sub(CHUNK_OVERLAP).max(start + 1);
    }

    chunks
}

/// Ranks document chunks against the query with an OpenAI-compatible embeddings endpoint
pub struct EmbeddingRetriever {
    llm_client: LlmClient,
    model: String,
    warmed_up: OnceCell<()>,
}

impl EmbeddingRetriever {
    pub fn new(llm_client: LlmClient, model: impl Into<String>) -> Self {
        Self {
            llm_client,
            model: model.into(),
            warmed_up: OnceCell::new(),
        }
    }

    async fn embed(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let response = self
            .llm_client
            .post("embeddings")
            .json(&serde_json::json!({
                "model": self.model,
                "input": inputs,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let details = serde_json::json!({ "status": status.as_u16(), "body": body });
            return Err(RetrievalError::embedding(format!("HTTP {}", status), Some(details)));
        }

        let mut parsed: EmbeddingResponse = response.json().await?;
        if parsed.data.len() != inputs.len() {
            return Err(RetrievalError::embedding(
                format!(
                    "Expected {} embeddings, got {}",
                    inputs.len(),
                    parsed.data.len()
                ),
                None,
            ));
        }
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Chunks of every document, tagged with the index of their source document
fn collect_chunks(documents: &[Document]) -> Vec<(usize, String)> {
    documents
        .iter()
        .enumerate()
        .flat_map(|(i, doc)| {
            chunk_text(&doc.content, MAX_CHUNKS_PER_DOCUMENT)
                .into_iter()
                .map(move |chunk| (i, chunk))
        })
        .take(MAX_TOTAL_CHUNKS)
        .collect()
}

#[async_trait]
impl PassageRetriever for EmbeddingRetriever {
    async fn retrieve(
        &self,
        query: &str,
        documents: &[Document],
        max_passages: usize,
    ) -> Result<Vec<Passage>, RetrievalError> {
        if documents.is_empty() || max_passages == 0 {
            return Ok(Vec::new());
        }

        let start = std::time::Instant::now();
        let chunks = collect_chunks(documents);
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let inputs: Vec<&str> = std::iter::once(query)
            .chain(chunks.iter().map(|(_, text)| text.as_str()))
            .collect();
        let mut embeddings = self.embed(&inputs).await?.into_iter();
        let query_embedding = embeddings
            .next()
            .ok_or_else(|| RetrievalError::embedding("Missing query embedding", None))?;

        let mut scored: Vec<Passage> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|((doc_index, text), embedding)| {
                let score = cosine_similarity(&query_embedding, &embedding);
                Passage::new(text, &documents[doc_index], score).with_embedding(embedding)
            })
            .collect();

        scored.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        scored.truncate(max_passages);

        tracing::debug!(
            passages = scored.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "Passages ranked"
        );

        Ok(scored)
    }

    async fn health_check(&self) -> bool {
        self.warmed_up
            .get_or_try_init(|| async { self.embed(&["warmup"]).await.map(|_| ()) })
            .await
            .map_err(|e| tracing::warn!(error = %e, "Embedding warm-up failed"))
            .is_ok()
    }
}
