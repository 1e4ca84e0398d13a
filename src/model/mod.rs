pub mod claims;
pub mod config;
pub mod conversation;
pub mod events;
pub mod search;

pub use claims::{AtomicClaim, EvidenceSpan, ExtractedClaims, VerificationResult};
pub use config::{Config, DomainFilter, LlmConfig, PipelineConfig, SearchConfig};
pub use conversation::{Conversation, ConversationMessage, MessageRole};
pub use events::{PipelineEvent, SourceCitation, VerificationReport};
pub use search::{Document, DocumentMetadata, ExtractedSubQueries, Passage};
