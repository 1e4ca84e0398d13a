//! Error types for pipeline collaborators

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Failure of the web search collaborator
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SearchError {
    #[error("Search request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Search backend error: {message}")]
    Backend {
        message: String,
        details: Option<Value>,
    },

    #[error("Search timed out after {0:?}")]
    Timeout(Duration),
}

impl SearchError {
    pub fn backend(message: impl Into<String>, details: Option<Value>) -> Self {
        Self::Backend {
            message: message.into(),
            details,
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }

    pub fn details(&self) -> Option<&Value> {
        match self {
            Self::Backend { details, .. } => details.as_ref(),
            _ => None,
        }
    }
}

/// Failure of the passage retrieval collaborator
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RetrievalError {
    #[error("Embedding request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Embedding backend error: {message}")]
    Embedding {
        message: String,
        details: Option<Value>,
    },

    #[error("Retrieval timed out after {0:?}")]
    Timeout(Duration),
}

impl RetrievalError {
    pub fn embedding(message: impl Into<String>, details: Option<Value>) -> Self {
        Self::Embedding {
            message: message.into(),
            details,
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }

    pub fn details(&self) -> Option<&Value> {
        match self {
            Self::Embedding { details, .. } => details.as_ref(),
            _ => None,
        }
    }
}

/// Failure of answer generation or query decomposition
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GenerationError {
    #[error("Generation request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Model backend error: {message}")]
    Backend {
        message: String,
        details: Option<Value>,
    },

    #[error("Generation stream failed: {0}")]
    Stream(String),
}

impl GenerationError {
    pub fn backend(message: impl Into<String>, details: Option<Value>) -> Self {
        Self::Backend {
            message: message.into(),
            details,
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }

    pub fn details(&self) -> Option<&Value> {
        match self {
            Self::Backend { details, .. } => details.as_ref(),
            _ => None,
        }
    }
}

/// Failure of claim verification
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VerificationError {
    #[error("Claim extraction failed: {message}")]
    Extraction {
        message: String,
        details: Option<Value>,
    },

    #[error("Verification timed out after {0:?}")]
    Timeout(Duration),

    #[error("Verification task failed: {0}")]
    Task(String),
}

impl VerificationError {
    pub fn extraction(message: impl Into<String>, details: Option<Value>) -> Self {
        Self::Extraction {
            message: message.into(),
            details,
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }

    pub fn details(&self) -> Option<&Value> {
        match self {
            Self::Extraction { details, .. } => details.as_ref(),
            _ => None,
        }
    }
}
