//! Streaming answer pipeline
//!
//! A run classifies the query, fans out web searches, retrieves passages, streams
//! the generated answer and verifies its claims in the background. Search and
//! retrieval failures degrade to a fallback answer; generation failures end the
//! run with an error event; verification failures only add an informational event.

pub mod classifier;
pub mod collaborators;
pub mod coordinator;
pub mod error;
pub mod fanout;
mod merge;
pub mod retrieval;
mod sink;
pub mod verification;

pub use collaborators::{
    AnswerGenerator, ClaimVerifier, Collaborators, GenerationChunk, PassageRetriever,
    QueryDecomposer, SearchProvider, TokenStream,
};
pub use coordinator::{PipelineCoordinator, PipelineHealth, PipelineRequest};
pub use error::{GenerationError, RetrievalError, SearchError, VerificationError};
