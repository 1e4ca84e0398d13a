//! Application state and service initialization
//!
//! This module centralizes all service initialization and dependency injection,
//! making it easier to manage the application lifecycle and test services.

use std::sync::Arc;

use sqlx::PgPool;

use crate::db::repository::ConversationRepository;
use crate::model::Config;
use crate::service::{
    ChatGenerator, ClaimVerificationService, Collaborators, DuckDuckGoSearch, EmbeddingRetriever,
    LlmClient, PipelineCoordinator, QueryDecompositionService,
};

/// Application state containing all services and shared resources
///
/// This struct centralizes service initialization and makes it easy to inject
/// dependencies into Actix-web handlers.
pub struct AppState {
    /// Database connection pool
    pub db_pool: Arc<PgPool>,
    /// Conversation persistence
    pub repository: ConversationRepository,
    /// Pipeline coordinator shared by all requests
    pub coordinator: PipelineCoordinator,
}

impl AppState {
    /// Initialize all services and build application state
    ///
    /// This performs:
    /// 1. Database connection and schema initialization
    /// 2. LLM client initialization (requires OPENAI_API_KEY)
    /// 3. Collaborator construction and coordinator wiring
    pub async fn new(config: Config) -> Result<Self, AppError> {
        // Initialize PostgreSQL database
        let db_pool = crate::db::create_pool()
            .await
            .map_err(|e| AppError::DatabaseInit(e.to_string()))?;

        // Initialize database schema
        crate::db::init_schema(&db_pool)
            .await
            .map_err(|e| AppError::DatabaseInit(e.to_string()))?;

        // Create shared LLM client (required)
        let api_key = config
            .llm
            .api_key
            .clone()
            .ok_or(AppError::MissingConfig("OPENAI_API_KEY"))?;

        let llm_client = LlmClient::new(&api_key, &config.llm)
            .map_err(|_| AppError::InvalidConfig("Invalid OPENAI_API_KEY"))?;

        let repository = ConversationRepository::new(db_pool.clone());
        let collaborators = Self::build_collaborators(&config, llm_client);

        tracing::info!(
            chat_model = %config.llm.chat_model,
            embedding_model = %config.llm.embedding_model,
            token_threshold = config.pipeline.verification_token_threshold,
            "Pipeline collaborators initialized"
        );

        let coordinator = PipelineCoordinator::new(collaborators, config.pipeline)
            .with_conversation_store(Arc::new(repository.clone()));

        Ok(Self {
            db_pool: Arc::new(db_pool),
            repository,
            coordinator,
        })
    }

    /// Build pipeline collaborators with all dependencies
    fn build_collaborators(config: &Config, llm_client: LlmClient) -> Collaborators {
        Collaborators {
            search: Arc::new(DuckDuckGoSearch::new(&config.search)),
            decomposer: Arc::new(QueryDecompositionService::new(
                llm_client.clone(),
                config.llm.decomposition_model.clone(),
            )),
            retriever: Arc::new(EmbeddingRetriever::new(
                llm_client.clone(),
                config.llm.embedding_model.clone(),
            )),
            generator: Arc::new(ChatGenerator::new(
                llm_client.clone(),
                config.llm.chat_model.clone(),
            )),
            verifier: Arc::new(ClaimVerificationService::new(
                llm_client,
                config.llm.claim_extraction_model.clone(),
            )),
        }
    }
}

/// Application-level errors
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AppError {
    /// Database initialization failed
    #[error("Database initialization failed: {0}")]
    DatabaseInit(String),

    /// Missing required configuration
    #[error("Missing required configuration: {0}")]
    MissingConfig(&'static str),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(&'static str),
}
