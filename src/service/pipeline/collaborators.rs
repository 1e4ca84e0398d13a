//! Capability interfaces the coordinator depends on

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use super::error::{GenerationError, RetrievalError, SearchError, VerificationError};
use crate::model::{Document, Passage, SourceCitation, VerificationResult};

/// One element of a generation stream
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationChunk {
    pub token: String,
    /// Citations, carried by the first chunk only
    pub sources: Option<Vec<SourceCitation>>,
}

impl GenerationChunk {
    pub fn token(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            sources: None,
        }
    }
}

/// Forward-only answer stream; an `Err` item ends it
pub type TokenStream = BoxStream<'static, Result<GenerationChunk, GenerationError>>;

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Document>, SearchError>;

    async fn health_check(&self) -> bool {
        true
    }
}

#[async_trait]
pub trait QueryDecomposer: Send + Sync {
    /// Split a query into focused sub-queries
    async fn decompose(
        &self,
        query: &str,
        context: Option<&str>,
    ) -> Result<Vec<String>, GenerationError>;
}

#[async_trait]
pub trait PassageRetriever: Send + Sync {
    async fn retrieve(
        &self,
        query: &str,
        documents: &[Document],
        max_passages: usize,
    ) -> Result<Vec<Passage>, RetrievalError>;

    async fn health_check(&self) -> bool {
        true
    }
}

#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(
        &self,
        query: &str,
        passages: &[Passage],
        context: Option<&str>,
    ) -> Result<TokenStream, GenerationError>;

    async fn health_check(&self) -> bool {
        true
    }
}

/// Claim verification. Must tolerate being called twice for one answer.
#[async_trait]
pub trait ClaimVerifier: Send + Sync {
    async fn verify(
        &self,
        text: &str,
        passages: &[Passage],
    ) -> Result<VerificationResult, VerificationError>;

    async fn health_check(&self) -> bool {
        true
    }
}

/// Shared collaborator handles, constructed once at startup
#[derive(Clone)]
pub struct Collaborators {
    pub search: Arc<dyn SearchProvider>,
    pub decomposer: Arc<dyn QueryDecomposer>,
    pub retriever: Arc<dyn PassageRetriever>,
    pub generator: Arc<dyn AnswerGenerator>,
    pub verifier: Arc<dyn ClaimVerifier>,
}
