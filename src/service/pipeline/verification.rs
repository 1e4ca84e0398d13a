//! Lifecycle of the background claim-verification task

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::{JoinError, JoinHandle};

use super::collaborators::ClaimVerifier;
use super::error::VerificationError;
use crate::model::{Passage, PipelineConfig, PipelineEvent, VerificationReport, VerificationResult};

type VerificationHandle = JoinHandle<Result<VerificationResult, VerificationError>>;

const RETRY_CONTEXT: &str = "CVA analysis failed";
const FALLBACK_CONTEXT: &str = "CVA fallback failed";

#[derive(Debug, Clone)]
pub struct VerificationPolicy {
    pub token_threshold: usize,
    pub await_timeout: Duration,
    pub retry_timeout: Duration,
    pub short_answer_timeout: Duration,
    pub cancel_grace: Duration,
}

impl From<&PipelineConfig> for VerificationPolicy {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            token_threshold: config.verification_token_threshold,
            await_timeout: config.verification_timeout(),
            retry_timeout: config.verification_retry_timeout(),
            short_answer_timeout: config.short_answer_verification_timeout(),
            cancel_grace: config.verification_cancel_grace(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VerificationOutcome {
    Report(VerificationReport),
    Failed(String),
}

impl VerificationOutcome {
    fn from_result(result: Result<VerificationResult, VerificationError>, context: &str) -> Self {
        match result {
            Ok(result) => {
                tracing::info!(
                    total_claims = result.total_claims,
                    verified_claims = result.verified_claims,
                    overall_confidence = result.overall_confidence,
                    "Claim verification completed"
                );
                Self::Report(VerificationReport::from(&result))
            }
            Err(e) => {
                tracing::warn!(
                    error = %e.message(),
                    details = ?e.details(),
                    "Claim verification failed"
                );
                Self::Failed(format!("{}: {}", context, e))
            }
        }
    }

    fn from_join(joined: Result<Result<VerificationResult, VerificationError>, JoinError>) -> Self {
        match joined {
            Ok(result) => Self::from_result(result, "CVA processing error"),
            Err(e) => {
                let err = VerificationError::Task(e.to_string());
                tracing::warn!(error = %err, "Verification task did not complete");
                Self::Failed(format!("CVA processing error: {}", err))
            }
        }
    }

    pub fn into_event(self) -> PipelineEvent {
        match self {
            Self::Report(report) => PipelineEvent::Verification(report),
            Self::Failed(message) => PipelineEvent::VerificationError { message },
        }
    }
}

/// Abort a task and wait briefly for it to wind down. Never fails.
pub async fn cancel_task<T>(label: &'static str, handle: JoinHandle<T>, grace: Duration) {
    if handle.is_finished() {
        return;
    }
    handle.abort();
    match tokio::time::timeout(grace, handle).await {
        Ok(Err(e)) if e.is_cancelled() => {
            tracing::debug!(task = label, "Background task cancelled");
        }
        Ok(_) => {
            tracing::debug!(task = label, "Background task finished before cancellation");
        }
        Err(_) => {
            tracing::warn!(
                task = label,
                grace_ms = grace.as_millis(),
                "Background task did not stop within grace period"
            );
        }
    }
}

/// Verification for one run: launched mid-stream, resolved after the stream ends
pub struct BackgroundVerification {
    verifier: Arc<dyn ClaimVerifier>,
    passages: Arc<Vec<Passage>>,
    policy: VerificationPolicy,
    requested: bool,
    launched: bool,
    task: Option<VerificationHandle>,
    ready: Option<VerificationOutcome>,
}

impl BackgroundVerification {
    pub fn new(
        verifier: Arc<dyn ClaimVerifier>,
        passages: Arc<Vec<Passage>>,
        policy: VerificationPolicy,
        requested: bool,
    ) -> Self {
        Self {
            verifier,
            passages,
            policy,
            requested,
            launched: false,
            task: None,
            ready: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Launch the task when the streamed token count hits the threshold
    pub fn on_token(&mut self, token_count: usize, text: &str) {
        if !self.requested
            || self.launched
            || token_count != self.policy.token_threshold
            || text.trim().is_empty()
        {
            return;
        }

        let verifier = Arc::clone(&self.verifier);
        let passages = Arc::clone(&self.passages);
        let snapshot = text.to_string();
        self.task = Some(tokio::spawn(async move {
            verifier.verify(&snapshot, &passages).await
        }));
        self.launched = true;

        tracing::info!(
            token_count = token_count,
            text_length = text.len(),
            "Background verification started"
        );
    }

    /// Wait for the running task and buffer its outcome.
    ///
    /// Never completes while no task is running.
    pub async fn wait_running(&mut self) {
        let Some(handle) = self.task.as_mut() else {
            return std::future::pending().await;
        };
        let joined = handle.await;
        self.task = None;
        tracing::debug!("Verification finished while streaming, buffering result");
        self.ready = Some(VerificationOutcome::from_join(joined));
    }

    /// Produce the verification outcome once streaming has ended
    pub async fn resolve(&mut self, final_text: &str) -> Option<VerificationOutcome> {
        if let Some(ready) = self.ready.take() {
            return Some(ready);
        }

        if let Some(handle) = self.task.as_mut() {
            let start_time = Instant::now();
            match tokio::time::timeout(self.policy.await_timeout, handle).await {
                Ok(joined) => {
                    self.task = None;
                    tracing::debug!(
                        waited_ms = start_time.elapsed().as_millis(),
                        "Awaited background verification"
                    );
                    return Some(VerificationOutcome::from_join(joined));
                }
                Err(_) => {
                    tracing::warn!(
                        timeout_ms = self.policy.await_timeout.as_millis(),
                        "Background verification timed out, retrying with the final answer"
                    );
                    if let Some(stale) = self.task.take() {
                        stale.abort();
                    }
                    let bound = self.policy.retry_timeout;
                    return Some(self.verify_now(final_text, bound, RETRY_CONTEXT).await);
                }
            }
        }

        if self.requested && !self.launched && !final_text.trim().is_empty() {
            self.launched = true;
            tracing::info!("Answer below verification threshold, verifying at end of stream");
            let bound = self.policy.short_answer_timeout;
            return Some(self.verify_now(final_text, bound, FALLBACK_CONTEXT).await);
        }

        None
    }

    async fn verify_now(&self, text: &str, bound: Duration, context: &str) -> VerificationOutcome {
        match tokio::time::timeout(bound, self.verifier.verify(text, &self.passages)).await {
            Ok(result) => VerificationOutcome::from_result(result, context),
            Err(_) => {
                let timed_out = Err(VerificationError::Timeout(bound));
                VerificationOutcome::from_result(timed_out, context)
            }
        }
    }

    /// Cancel a still-running task, waiting out the grace period at most
    pub async fn cancel(&mut self) {
        if let Some(handle) = self.task.take() {
            cancel_task("verification", handle, self.policy.cancel_grace).await;
        }
    }
}

impl Drop for BackgroundVerification {
    fn drop(&mut self) {
        if let Some(handle) = &self.task {
            handle.abort();
        }
    }
}
