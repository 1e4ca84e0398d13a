//! Shared LLM client and interaction utilities
//!
//! Structured extraction goes through rig's OpenAI provider; streaming chat and
//! embeddings use plain HTTP against the OpenAI-compatible endpoint.

use reqwest::{Client, RequestBuilder};
use rig::providers::openai;

use crate::model::LlmConfig;

/// Shared LLM client wrapper
#[derive(Clone)]
pub struct LlmClient {
    client: openai::Client,
    http: Client,
    base_url: String,
    api_key: String,
}

impl LlmClient {
    /// Create a new LLM client with the provided API key
    pub fn new(api_key: &str, config: &LlmConfig) -> Result<Self, String> {
        let client = openai::Client::new(api_key)
            .map_err(|e| format!("Failed to create OpenAI client: {}", e))?;

        let http = Client::builder()
            .user_agent(concat!("askflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// Get a reference to the underlying OpenAI client
    /// Use this to create extractors with custom configuration
    pub fn openai_client(&self) -> &openai::Client {
        &self.client
    }

    /// Authenticated GET to `{base_url}/{path}`
    pub fn get(&self, path: &str) -> RequestBuilder {
        self.http
            .get(self.endpoint(path))
            .bearer_auth(&self.api_key)
    }

    /// Authenticated POST to `{base_url}/{path}`
    pub fn post(&self, path: &str) -> RequestBuilder {
        self.http
            .post(self.endpoint(path))
            .bearer_auth(&self.api_key)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}
