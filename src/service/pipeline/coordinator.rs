//! Per-request orchestration: search, retrieval, generation and verification

use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::{FutureExt, Stream};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;
use uuid::Uuid;

use super::collaborators::Collaborators;
use super::error::SearchError;
use super::fanout::SearchFanOut;
use super::merge::merge_stream;
use super::retrieval::RetrievalStage;
use super::sink::{EventSink, Halt};
use super::verification::{BackgroundVerification, VerificationPolicy, cancel_task};
use crate::model::{Document, MessageRole, PipelineConfig, PipelineEvent};
use crate::service::conversation::ConversationStore;

const EVENT_BUFFER: usize = 64;
const FALLBACK_ERROR: &str = "Search/retrieval services unavailable";
const PANIC_ERROR: &str = "Internal pipeline error";

/// Apology streamed when no sources could be found
pub fn fallback_message(query: &str) -> String {
    format!(
        "I apologize, but I'm having trouble finding relevant information about '{}' right now. \
         This could be due to search service issues or network connectivity problems. \
         Please try asking again in a moment.",
        query
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Searching,
    Retrieving,
    Generating,
}

/// Input of one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub query: String,
    /// Prior-turn context. Loaded from the conversation store when absent.
    pub context: Option<String>,
    pub conversation_id: Option<String>,
    pub verify: bool,
    pub passage_limit: usize,
}

impl PipelineRequest {
    pub fn new(query: impl Into<String>, passage_limit: usize) -> Self {
        Self {
            query: query.into(),
            context: None,
            conversation_id: None,
            verify: true,
            passage_limit: passage_limit.max(1),
        }
    }

    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn for_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }
}

/// Readiness of each collaborator
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PipelineHealth {
    pub search: bool,
    pub retrieval: bool,
    pub generation: bool,
    pub verification: bool,
}

impl PipelineHealth {
    pub fn is_ready(&self) -> bool {
        self.search && self.retrieval && self.generation && self.verification
    }
}

/// Event stream of a running pipeline. Dropping it cancels the run.
pub struct PipelineRun {
    message_id: Uuid,
    events: ReceiverStream<PipelineEvent>,
    cancel: CancellationToken,
}

impl PipelineRun {
    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Stream for PipelineRun {
    type Item = PipelineEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

impl Drop for PipelineRun {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Background work owned by one run
#[derive(Default)]
struct RunTasks {
    search: Option<JoinHandle<Vec<Document>>>,
    verification: Option<BackgroundVerification>,
}

impl RunTasks {
    async fn cleanup(&mut self, cleanup_timeout: Duration) {
        if let Some(handle) = self.search.take() {
            cancel_task("search", handle, cleanup_timeout).await;
        }
        if let Some(mut verification) = self.verification.take() {
            verification.cancel().await;
        }
    }
}

/// Coordinates pipeline runs over shared collaborators
#[derive(Clone)]
pub struct PipelineCoordinator {
    collaborators: Collaborators,
    conversations: Option<Arc<dyn ConversationStore>>,
    config: PipelineConfig,
}

impl PipelineCoordinator {
    pub fn new(collaborators: Collaborators, config: PipelineConfig) -> Self {
        Self {
            collaborators,
            conversations: None,
            config,
        }
    }

    pub fn with_conversation_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.conversations = Some(store);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Start a run. Events arrive on the returned stream, which always ends
    /// with `Done` or a terminal `Error`.
    pub fn process_chat(&self, request: PipelineRequest) -> PipelineRun {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();
        let message_id = Uuid::new_v4();

        let sink = EventSink::new(tx, cancel.clone());
        let coordinator = self.clone();
        tokio::spawn(async move {
            coordinator.execute(request, message_id, sink).await;
        });

        PipelineRun {
            message_id,
            events: ReceiverStream::new(rx),
            cancel,
        }
    }

    pub async fn health(&self) -> PipelineHealth {
        let c = &self.collaborators;
        let (search, retrieval, generation, verification) = tokio::join!(
            c.search.health_check(),
            c.retriever.health_check(),
            c.generator.health_check(),
            c.verifier.health_check(),
        );
        PipelineHealth {
            search,
            retrieval,
            generation,
            verification,
        }
    }

    async fn execute(self, request: PipelineRequest, message_id: Uuid, sink: EventSink) {
        let started = Instant::now();
        let mut tasks = RunTasks::default();

        tracing::info!(
            message_id = %message_id,
            query = %request.query,
            verify = request.verify,
            passage_limit = request.passage_limit,
            "Pipeline run started"
        );

        let start = PipelineEvent::Start { message_id };
        if sink.emit(start).await.is_err() {
            return;
        }

        let outcome = AssertUnwindSafe(self.drive(&request, &sink, &mut tasks, started))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(Halt::Failed(PANIC_ERROR.to_string())));

        match outcome {
            Ok(answer) => {
                tasks.cleanup(self.config.cleanup_timeout()).await;
                tracing::info!(
                    message_id = %message_id,
                    total_ms = started.elapsed().as_millis(),
                    "Pipeline run completed"
                );
                self.persist_answer(&request, &answer).await;
            }
            Err(Halt::Failed(message)) => {
                tracing::error!(message_id = %message_id, error = %message, "Pipeline run failed");
                let _ = sink
                    .emit(PipelineEvent::Error {
                        message,
                        fallback: false,
                    })
                    .await;
                tasks.cleanup(self.config.cleanup_timeout()).await;
            }
            Err(Halt::Cancelled) => {
                tracing::info!(message_id = %message_id, "Pipeline run cancelled");
                tasks.cleanup(self.config.cleanup_timeout()).await;
                sink.try_emit(PipelineEvent::Error {
                    message: "Run cancelled".to_string(),
                    fallback: false,
                });
            }
            Err(Halt::Disconnected) => {
                tracing::debug!(message_id = %message_id, "Event consumer went away");
                tasks.cleanup(self.config.cleanup_timeout()).await;
            }
        }
    }

    async fn drive(
        &self,
        request: &PipelineRequest,
        sink: &EventSink,
        tasks: &mut RunTasks,
        started: Instant,
    ) -> Result<String, Halt> {
        let context = sink.guard(self.resolve_context(request)).await?;

        self.enter(Stage::Searching, started);
        let documents = self
            .search_stage(request, context.clone(), sink, tasks)
            .await?;
        if documents.is_empty() {
            return self.fallback(request, sink, Stage::Searching).await;
        }

        self.enter(Stage::Retrieving, started);
        let retrieval = RetrievalStage::new(
            Arc::clone(&self.collaborators.retriever),
            self.config.retrieval_timeout(),
        );
        let retrieved = retrieval.run(&request.query, &documents, request.passage_limit);
        let passages = sink.guard(retrieved).await?;
        if passages.is_empty() {
            return self.fallback(request, sink, Stage::Retrieving).await;
        }

        self.enter(Stage::Generating, started);
        let stream = sink
            .guard(self.collaborators.generator.generate(
                &request.query,
                &passages,
                context.as_deref(),
            ))
            .await?
            .map_err(|e| {
                tracing::error!(
                    error = %e.message(),
                    details = ?e.details(),
                    "Generation could not start"
                );
                Halt::Failed(format!("Generation failed: {}", e))
            })?;

        let passages = Arc::new(passages);
        let verification = tasks.verification.insert(BackgroundVerification::new(
            Arc::clone(&self.collaborators.verifier),
            Arc::clone(&passages),
            VerificationPolicy::from(&self.config),
            request.verify,
        ));
        let answer = merge_stream(sink, stream, verification, &passages, started).await?;

        sink.emit(PipelineEvent::Done).await?;
        Ok(answer)
    }

    fn enter(&self, stage: Stage, started: Instant) {
        tracing::info!(
            stage = ?stage,
            elapsed_ms = started.elapsed().as_millis(),
            "Pipeline stage"
        );
    }

    async fn search_stage(
        &self,
        request: &PipelineRequest,
        context: Option<String>,
        sink: &EventSink,
        tasks: &mut RunTasks,
    ) -> Result<Vec<Document>, Halt> {
        let fan_out = SearchFanOut::new(
            Arc::clone(&self.collaborators.search),
            Arc::clone(&self.collaborators.decomposer),
            &self.config,
        );
        let query = request.query.clone();
        let ceiling = self.config.search_ceiling(request.passage_limit);
        let stage_timeout = self.config.search_stage_timeout();

        let handle = tasks.search.insert(tokio::spawn(async move {
            fan_out.run(&query, context.as_deref(), ceiling).await
        }));

        let search = tokio::time::timeout(stage_timeout, handle);
        let joined = sink.guard(search).await?;
        let documents = match joined {
            Ok(Ok(documents)) => documents,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Search task failed, treating as no documents");
                Vec::new()
            }
            Err(_) => {
                let err = SearchError::Timeout(stage_timeout);
                tracing::warn!(error = %err, "Search stage timed out, treating as no documents");
                if let Some(handle) = tasks.search.take() {
                    cancel_task("search", handle, self.config.cleanup_timeout()).await;
                }
                Vec::new()
            }
        };

        tracing::info!(documents = documents.len(), "Search stage completed");
        Ok(documents)
    }

    async fn fallback(
        &self,
        request: &PipelineRequest,
        sink: &EventSink,
        from: Stage,
    ) -> Result<String, Halt> {
        tracing::warn!(
            from = ?from,
            query = %request.query,
            "No usable sources, streaming fallback answer"
        );

        let message = fallback_message(&request.query);
        let pacing = self.config.fallback_pacing();
        let every = self.config.fallback_pacing_every.max(1);

        for (i, ch) in message.chars().enumerate() {
            sink.emit(PipelineEvent::token(ch.to_string())).await?;
            if i % every == 0 && !pacing.is_zero() {
                sink.guard(tokio::time::sleep(pacing)).await?;
            }
        }

        sink.emit(PipelineEvent::Error {
            message: FALLBACK_ERROR.to_string(),
            fallback: true,
        })
        .await?;
        sink.emit(PipelineEvent::Done).await?;
        Ok(message)
    }

    async fn resolve_context(&self, request: &PipelineRequest) -> Option<String> {
        if request.context.is_some() {
            return request.context.clone();
        }
        let (Some(store), Some(conversation_id)) = (&self.conversations, &request.conversation_id)
        else {
            return None;
        };

        match store.context(conversation_id).await {
            Ok(context) => context,
            Err(e) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    error = %e,
                    "Failed to load conversation context"
                );
                None
            }
        }
    }

    async fn persist_answer(&self, request: &PipelineRequest, answer: &str) {
        let (Some(store), Some(conversation_id)) = (&self.conversations, &request.conversation_id)
        else {
            return;
        };
        if answer.trim().is_empty() {
            return;
        }

        match store
            .save_message(conversation_id, MessageRole::Assistant, answer)
            .await
        {
            Ok(message_id) => tracing::debug!(
                conversation_id = %conversation_id,
                message_id = %message_id,
                "Saved assistant answer"
            ),
            Err(e) => tracing::warn!(
                conversation_id = %conversation_id,
                error = %e,
                "Failed to save assistant answer"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::Ordering;

    use async_trait::async_trait;
    use chrono::Utc;
    use futures::{StreamExt, stream};
    use pretty_assertions::assert_eq;
    use url::Url;

    use super::*;
    use crate::model::{ConversationMessage, DocumentMetadata, Passage, SourceCitation};
    use crate::service::conversation::StoreError;
    use crate::service::pipeline::collaborators::{
        AnswerGenerator, GenerationChunk, PassageRetriever, QueryDecomposer, SearchProvider,
        TokenStream,
    };
    use crate::service::pipeline::error::{GenerationError, RetrievalError};
    use crate::service::pipeline::verification::tests::ScriptedVerifier;

    const QUERY: &str = "What is GGML?";

    enum SearchMode {
        Docs,
        Empty,
        Hang,
    }

    struct FakeSearch(SearchMode);

    #[async_trait]
    impl SearchProvider for FakeSearch {
        async fn search(
            &self,
            query: &str,
            _max_results: usize,
        ) -> Result<Vec<Document>, SearchError> {
            match self.0 {
                SearchMode::Docs => Ok(["https://ggml.ai/", "https://github.com/ggml-org/ggml"]
                    .iter()
                    .enumerate()
                    .map(|(rank, url)| Document {
                        url: Url::parse(url).unwrap(),
                        title: format!("Result {}", rank),
                        content: "GGML is a tensor library for machine learning.".to_string(),
                        excerpt: format!("GGML excerpt {}", rank),
                        fetched_at: Utc::now(),
                        metadata: DocumentMetadata {
                            source: "fake".to_string(),
                            query: query.to_string(),
                            rank,
                        },
                    })
                    .collect()),
                SearchMode::Empty => Ok(Vec::new()),
                SearchMode::Hang => std::future::pending().await,
            }
        }
    }

    struct EchoDecomposer;

    #[async_trait]
    impl QueryDecomposer for EchoDecomposer {
        async fn decompose(
            &self,
            query: &str,
            _context: Option<&str>,
        ) -> Result<Vec<String>, GenerationError> {
            Ok(vec![query.to_string()])
        }
    }

    struct ExcerptRetriever;

    #[async_trait]
    impl PassageRetriever for ExcerptRetriever {
        async fn retrieve(
            &self,
            _query: &str,
            documents: &[Document],
            max_passages: usize,
        ) -> Result<Vec<Passage>, RetrievalError> {
            Ok(documents
                .iter()
                .take(max_passages)
                .map(|d| Passage::new(d.excerpt.clone(), d, 0.8))
                .collect())
        }
    }

    struct EmptyRetriever;

    #[async_trait]
    impl PassageRetriever for EmptyRetriever {
        async fn retrieve(
            &self,
            _query: &str,
            _documents: &[Document],
            _max_passages: usize,
        ) -> Result<Vec<Passage>, RetrievalError> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct FakeGenerator {
        tokens: Vec<String>,
        sources: Option<Vec<SourceCitation>>,
        panic_on_start: bool,
        fail_after: Option<usize>,
        hang_at_end: bool,
        seen_context: Mutex<Option<String>>,
    }

    impl FakeGenerator {
        fn words(count: usize) -> Self {
            Self {
                tokens: (0..count).map(|i| format!("w{} ", i)).collect(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl AnswerGenerator for FakeGenerator {
        async fn generate(
            &self,
            _query: &str,
            _passages: &[Passage],
            context: Option<&str>,
        ) -> Result<TokenStream, GenerationError> {
            if self.panic_on_start {
                panic!("generator blew up");
            }
            *self.seen_context.lock().unwrap() = context.map(str::to_string);

            let mut items = Vec::new();
            for (i, token) in self.tokens.iter().enumerate() {
                if self.fail_after == Some(i) {
                    items.push(Err(GenerationError::Stream("connection reset".to_string())));
                    break;
                }
                let mut chunk = GenerationChunk::token(token.clone());
                if i == 0 {
                    chunk.sources = self.sources.clone();
                }
                items.push(Ok(chunk));
            }

            let tail = if self.hang_at_end {
                stream::pending().boxed()
            } else {
                stream::empty().boxed()
            };
            Ok(stream::iter(items).chain(tail).boxed())
        }
    }

    #[derive(Default)]
    struct InMemoryStore {
        messages: Mutex<Vec<ConversationMessage>>,
    }

    #[async_trait]
    impl ConversationStore for InMemoryStore {
        async fn recent_messages(
            &self,
            conversation_id: &str,
            limit: usize,
        ) -> Result<Vec<ConversationMessage>, StoreError> {
            let messages = self.messages.lock().unwrap();
            let matching: Vec<_> = messages
                .iter()
                .filter(|m| m.conversation_id == conversation_id)
                .cloned()
                .collect();
            Ok(matching[matching.len().saturating_sub(limit)..].to_vec())
        }

        async fn save_message(
            &self,
            conversation_id: &str,
            role: MessageRole,
            content: &str,
        ) -> Result<String, StoreError> {
            let mut messages = self.messages.lock().unwrap();
            let id = format!("m{}", messages.len());
            messages.push(ConversationMessage {
                id: id.clone(),
                conversation_id: conversation_id.to_string(),
                role,
                content: content.to_string(),
                created_at: Utc::now(),
            });
            Ok(id)
        }
    }

    fn coordinator(
        search: SearchMode,
        generator: Arc<FakeGenerator>,
        verifier: Arc<ScriptedVerifier>,
    ) -> PipelineCoordinator {
        coordinator_with_retriever(search, Arc::new(ExcerptRetriever), generator, verifier)
    }

    fn coordinator_with_retriever(
        search: SearchMode,
        retriever: Arc<dyn PassageRetriever>,
        generator: Arc<FakeGenerator>,
        verifier: Arc<ScriptedVerifier>,
    ) -> PipelineCoordinator {
        PipelineCoordinator::new(
            Collaborators {
                search: Arc::new(FakeSearch(search)),
                decomposer: Arc::new(EchoDecomposer),
                retriever,
                generator,
                verifier,
            },
            PipelineConfig::default(),
        )
    }

    fn citation(url: &str, title: &str, relevance_score: f32) -> SourceCitation {
        SourceCitation {
            url: url.to_string(),
            title: title.to_string(),
            excerpt: "GGML is a tensor library.".to_string(),
            relevance_score,
        }
    }

    fn kind(event: &PipelineEvent) -> &'static str {
        match event {
            PipelineEvent::Start { .. } => "start",
            PipelineEvent::Token { .. } => "token",
            PipelineEvent::Sources { .. } => "sources",
            PipelineEvent::Verification(_) => "claims",
            PipelineEvent::VerificationError { .. } => "cva_error",
            PipelineEvent::Error { .. } => "error",
            PipelineEvent::Done => "done",
        }
    }

    fn answer(events: &[PipelineEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::Token { content } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }

    fn positions(events: &[PipelineEvent], wanted: &[&str]) -> Vec<usize> {
        events
            .iter()
            .enumerate()
            .filter(|(_, e)| wanted.contains(&kind(e)))
            .map(|(i, _)| i)
            .collect()
    }

    fn assert_fallback_sequence(events: &[PipelineEvent], query: &str) {
        let n = events.len();
        assert!(matches!(events[0], PipelineEvent::Start { .. }));
        assert!(events[1..n - 2].iter().all(|e| kind(e) == "token"));
        assert_eq!(
            events[n - 2],
            PipelineEvent::Error {
                message: FALLBACK_ERROR.to_string(),
                fallback: true,
            }
        );
        assert_eq!(events[n - 1], PipelineEvent::Done);
        assert_eq!(answer(events), fallback_message(query));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_search_streams_fallback() {
        let verifier = Arc::new(ScriptedVerifier::new(&[], false));
        let pipeline = coordinator(
            SearchMode::Empty,
            Arc::new(FakeGenerator::words(15)),
            verifier.clone(),
        );

        let events: Vec<_> = pipeline
            .process_chat(PipelineRequest::new(QUERY, 6))
            .collect()
            .await;

        assert_fallback_sequence(&events, QUERY);
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_timeout_streams_fallback() {
        let pipeline = coordinator(
            SearchMode::Hang,
            Arc::new(FakeGenerator::words(15)),
            Arc::new(ScriptedVerifier::new(&[], false)),
        );

        let started = tokio::time::Instant::now();
        let events: Vec<_> = pipeline
            .process_chat(PipelineRequest::new(QUERY, 6))
            .collect()
            .await;

        assert_fallback_sequence(&events, QUERY);
        assert!(started.elapsed() >= Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_ordering_with_background_verification() {
        let verifier = Arc::new(ScriptedVerifier::new(&[1], false));
        let pipeline = coordinator(
            SearchMode::Docs,
            Arc::new(FakeGenerator::words(15)),
            verifier.clone(),
        );

        let events: Vec<_> = pipeline
            .process_chat(PipelineRequest::new(QUERY, 6))
            .collect()
            .await;

        let sources = positions(&events, &["sources"]);
        let tokens = positions(&events, &["token"]);
        let verification = positions(&events, &["claims", "cva_error"]);

        assert_eq!(sources.len(), 1);
        assert!(sources[0] < tokens[0]);
        assert_eq!(tokens.len(), 15);
        assert_eq!(verification.len(), 1);
        assert!(verification[0] > *tokens.last().unwrap());
        assert_eq!(kind(&events[verification[0]]), "claims");
        assert_eq!(events.last(), Some(&PipelineEvent::Done));
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);

        match &events[sources[0]] {
            PipelineEvent::Sources { sources } => {
                assert_eq!(sources.len(), 2);
                assert_eq!(sources[0].excerpt, "GGML excerpt 0");
            }
            other => panic!("expected sources, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_generator_citations_are_forwarded() {
        let generator = FakeGenerator {
            sources: Some(vec![citation("https://ggml.ai/", "from generator", 1.4)]),
            ..FakeGenerator::words(3)
        };
        let pipeline = coordinator(
            SearchMode::Docs,
            Arc::new(generator),
            Arc::new(ScriptedVerifier::new(&[], false)),
        );

        let request = PipelineRequest::new(QUERY, 6).with_verification(false);
        let events: Vec<_> = pipeline.process_chat(request).collect().await;

        assert_eq!(kind(&events[1]), "sources");
        match &events[1] {
            PipelineEvent::Sources { sources } => {
                assert_eq!(sources.len(), 1);
                assert_eq!(sources[0].title, "from generator");
                assert_eq!(sources[0].relevance_score, 1.0);
            }
            other => panic!("expected sources, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_generator_citations_fall_back_to_passages() {
        let generator = FakeGenerator {
            sources: Some(vec![citation("https://elsewhere.example/", "orphan", 0.9)]),
            ..FakeGenerator::words(3)
        };
        let pipeline = coordinator(
            SearchMode::Docs,
            Arc::new(generator),
            Arc::new(ScriptedVerifier::new(&[], false)),
        );

        let request = PipelineRequest::new(QUERY, 6).with_verification(false);
        let events: Vec<_> = pipeline.process_chat(request).collect().await;

        match &events[1] {
            PipelineEvent::Sources { sources } => {
                assert_eq!(sources.len(), 2);
                assert!(sources.iter().all(|s| s.title != "orphan"));
                assert_eq!(sources[0].excerpt, "GGML excerpt 0");
            }
            other => panic!("expected sources, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_retrieval_streams_fallback() {
        let verifier = Arc::new(ScriptedVerifier::new(&[], false));
        let generator = Arc::new(FakeGenerator::words(15));
        let pipeline = coordinator_with_retriever(
            SearchMode::Docs,
            Arc::new(EmptyRetriever),
            generator.clone(),
            verifier.clone(),
        );

        let events: Vec<_> = pipeline
            .process_chat(PipelineRequest::new(QUERY, 6))
            .collect()
            .await;

        assert_fallback_sequence(&events, QUERY);
        assert!(positions(&events, &["sources"]).is_empty());
        assert!(generator.seen_context.lock().unwrap().is_none());
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_stage_ends_with_error() {
        let generator = FakeGenerator {
            panic_on_start: true,
            ..FakeGenerator::words(15)
        };
        let pipeline = coordinator(
            SearchMode::Docs,
            Arc::new(generator),
            Arc::new(ScriptedVerifier::new(&[], false)),
        );

        let events: Vec<_> = pipeline
            .process_chat(PipelineRequest::new(QUERY, 6))
            .collect()
            .await;

        assert!(matches!(events[0], PipelineEvent::Start { .. }));
        assert!(positions(&events, &["done", "token", "sources"]).is_empty());
        assert_eq!(
            events.last(),
            Some(&PipelineEvent::Error {
                message: PANIC_ERROR.to_string(),
                fallback: false,
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_verifier_still_completes() {
        let pipeline = coordinator(
            SearchMode::Docs,
            Arc::new(FakeGenerator::words(15)),
            Arc::new(ScriptedVerifier::new(&[], true)),
        );

        let events: Vec<_> = pipeline
            .process_chat(PipelineRequest::new(QUERY, 6))
            .collect()
            .await;

        assert_eq!(positions(&events, &["cva_error"]).len(), 1);
        assert!(positions(&events, &["claims", "error"]).is_empty());
        assert_eq!(answer(&events), FakeGenerator::words(15).tokens.concat());
        assert_eq!(events.last(), Some(&PipelineEvent::Done));
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_answer_is_verified_at_end() {
        let verifier = Arc::new(ScriptedVerifier::new(&[], false));
        let pipeline = coordinator(
            SearchMode::Docs,
            Arc::new(FakeGenerator::words(3)),
            verifier.clone(),
        );

        let events: Vec<_> = pipeline
            .process_chat(PipelineRequest::new(QUERY, 6))
            .collect()
            .await;

        let kinds: Vec<_> = events.iter().map(kind).collect();
        assert_eq!(
            kinds,
            vec!["start", "sources", "token", "token", "token", "claims", "done"]
        );
        assert_eq!(
            verifier.texts.lock().unwrap().clone(),
            vec!["w0 w1 w2 ".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_verification_disabled() {
        let verifier = Arc::new(ScriptedVerifier::new(&[], false));
        let pipeline = coordinator(
            SearchMode::Docs,
            Arc::new(FakeGenerator::words(15)),
            verifier.clone(),
        );

        let request = PipelineRequest::new(QUERY, 6).with_verification(false);
        let events: Vec<_> = pipeline.process_chat(request).collect().await;

        assert!(positions(&events, &["claims", "cva_error"]).is_empty());
        assert_eq!(events.last(), Some(&PipelineEvent::Done));
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_error_terminates_run() {
        let generator = FakeGenerator {
            fail_after: Some(3),
            ..FakeGenerator::words(15)
        };
        let pipeline = coordinator(
            SearchMode::Docs,
            Arc::new(generator),
            Arc::new(ScriptedVerifier::new(&[], false)),
        );

        let events: Vec<_> = pipeline
            .process_chat(PipelineRequest::new(QUERY, 6))
            .collect()
            .await;

        assert_eq!(positions(&events, &["token"]).len(), 3);
        assert!(positions(&events, &["done"]).is_empty());
        match events.last() {
            Some(PipelineEvent::Error { message, fallback }) => {
                assert!(!fallback);
                assert!(message.contains("connection reset"));
            }
            other => panic!("expected terminal error, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_run_and_verification() {
        let generator = FakeGenerator {
            hang_at_end: true,
            ..FakeGenerator::words(12)
        };
        let verifier = Arc::new(ScriptedVerifier::new(&[600], false));
        let pipeline = coordinator(SearchMode::Docs, Arc::new(generator), verifier.clone());

        let mut run = pipeline.process_chat(PipelineRequest::new(QUERY, 6));
        let mut events = Vec::new();
        while let Some(event) = run.next().await {
            let is_token = kind(&event) == "token";
            events.push(event);
            if is_token && positions(&events, &["token"]).len() == 12 {
                break;
            }
        }

        run.cancel();
        while let Some(event) = run.next().await {
            events.push(event);
        }

        assert!(positions(&events, &["done", "claims"]).is_empty());
        assert_eq!(
            events.last(),
            Some(&PipelineEvent::Error {
                message: "Run cancelled".to_string(),
                fallback: false,
            })
        );
        assert!(verifier.calls.load(Ordering::SeqCst) <= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conversation_context_loaded_and_answer_saved() {
        let store = Arc::new(InMemoryStore::default());
        store
            .save_message("c1", MessageRole::User, QUERY)
            .await
            .unwrap();
        let generator = Arc::new(FakeGenerator::words(4));
        let pipeline = coordinator(
            SearchMode::Docs,
            generator.clone(),
            Arc::new(ScriptedVerifier::new(&[], false)),
        )
        .with_conversation_store(store.clone());

        let events: Vec<_> = pipeline
            .process_chat(PipelineRequest::new(QUERY, 6).for_conversation("c1"))
            .collect()
            .await;

        assert_eq!(
            generator.seen_context.lock().unwrap().clone(),
            Some("user: What is GGML?".to_string())
        );
        let saved = store.messages.lock().unwrap().clone();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[1].role, MessageRole::Assistant);
        assert_eq!(saved[1].content, answer(&events));
    }

    #[tokio::test]
    async fn test_health_reports_all_collaborators() {
        let pipeline = coordinator(
            SearchMode::Docs,
            Arc::new(FakeGenerator::words(1)),
            Arc::new(ScriptedVerifier::new(&[], false)),
        );
        assert!(pipeline.health().await.is_ready());
    }
}
