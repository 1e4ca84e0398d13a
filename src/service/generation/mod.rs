//! Streaming answer generation over an OpenAI-compatible chat endpoint

mod prompts;
mod sse;

use async_trait::async_trait;
use futures::StreamExt;

use crate::model::Passage;
use crate::model::events::citations;
use crate::service::LlmClient;
use crate::service::pipeline::{AnswerGenerator, GenerationChunk, GenerationError, TokenStream};

pub use prompts::{ANSWER_SYSTEM_PROMPT, build_answer_prompt};
pub use sse::content_deltas;

const TEMPERATURE: f64 = 0.2;
const TOP_P: f64 = 0.9;

/// Answer generator streaming chat completions
pub struct ChatGenerator {
    llm_client: LlmClient,
    model: String,
}

impl ChatGenerator {
    pub fn new(llm_client: LlmClient, model: impl Into<String>) -> Self {
        let model = model.into();
        tracing::info!(model = %model, "Answer generator initialized");
        Self { llm_client, model }
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "stream": true,
            "temperature": TEMPERATURE,
            "top_p": TOP_P,
            "messages": [
                { "role": "system", "content": ANSWER_SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
        })
    }
}

#[async_trait]
impl AnswerGenerator for ChatGenerator {
    async fn generate(
        &self,
        query: &str,
        passages: &[Passage],
        context: Option<&str>,
    ) -> Result<TokenStream, GenerationError> {
        let prompt = build_answer_prompt(query, passages, context);

        tracing::debug!(
            model = %self.model,
            passages = passages.len(),
            prompt_length = prompt.len(),
            "Starting answer generation"
        );

        let response = self
            .llm_client
            .post("chat/completions")
            .json(&self.request_body(&prompt))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, "Chat completion request rejected");
            let details = serde_json::json!({ "status": status.as_u16(), "body": body });
            return Err(GenerationError::backend(format!("HTTP {}", status), Some(details)));
        }

        let mut sources = Some(citations(passages));
        let stream = content_deltas(response.bytes_stream()).map(move |item| {
            item.map(|token| {
                let mut chunk = GenerationChunk::token(token);
                chunk.sources = sources.take();
                chunk
            })
        });

        Ok(stream.boxed())
    }

    async fn health_check(&self) -> bool {
        match self.llm_client.get("models").send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::warn!(error = %e, "Chat model endpoint unreachable");
                false
            }
        }
    }
}
