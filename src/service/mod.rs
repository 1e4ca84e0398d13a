pub mod claims;
pub mod conversation;
pub mod decomposition;
pub mod embedding;
pub mod generation;
pub mod llm;
pub mod pipeline;
pub mod search;

pub use claims::ClaimVerificationService;
pub use decomposition::QueryDecompositionService;
pub use embedding::EmbeddingRetriever;
pub use generation::ChatGenerator;
pub use llm::LlmClient;
pub use pipeline::{Collaborators, PipelineCoordinator};
pub use search::DuckDuckGoSearch;
