//! Claim verification service
//!
//! Extracts factual claims from an answer with rig-core and checks each one
//! against the retrieved passages by fuzzy key-term matching.

pub mod evidence;
pub mod prompts;

use async_trait::async_trait;

use crate::model::{ExtractedClaims, Passage, VerificationResult};
use crate::service::LlmClient;
use crate::service::claims::evidence::check_claim;
use crate::service::claims::prompts::{EXTRACTION_SYSTEM_PROMPT, build_extraction_prompt};
use crate::service::pipeline::{ClaimVerifier, VerificationError};

/// Claims checked per answer
const MAX_CHECKED_CLAIMS: usize = 3;

/// Service verifying answer claims against passages
pub struct ClaimVerificationService {
    llm_client: LlmClient,
    model: String,
}

impl ClaimVerificationService {
    pub fn new(llm_client: LlmClient, model: impl Into<String>) -> Self {
        let model = model.into();
        tracing::info!(model = %model, "Claim verification service initialized");
        Self { llm_client, model }
    }

    async fn extract_claims(&self, answer: &str) -> Result<Vec<String>, VerificationError> {
        let extractor = self
            .llm_client
            .openai_client()
            .extractor::<ExtractedClaims>(&self.model)
            .preamble(EXTRACTION_SYSTEM_PROMPT)
            .additional_params(serde_json::json!({
                "temperature": 0.1
            }))
            .build();

        let extracted = extractor
            .extract(&build_extraction_prompt(answer))
            .await
            .map_err(|e| {
                VerificationError::extraction(
                    e.to_string(),
                    Some(serde_json::json!({ "model": self.model })),
                )
            })?;

        Ok(extracted.claims)
    }
}

/// Check the leading extracted claims, skipping blanks
pub fn check_claims(
    extracted: Vec<String>,
    passages: &[Passage],
) -> Vec<crate::model::AtomicClaim> {
    extracted
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .take(MAX_CHECKED_CLAIMS)
        .enumerate()
        .map(|(i, text)| check_claim(format!("claim_{}", i + 1), text, passages))
        .collect()
}

#[async_trait]
impl ClaimVerifier for ClaimVerificationService {
    async fn verify(
        &self,
        text: &str,
        passages: &[Passage],
    ) -> Result<VerificationResult, VerificationError> {
        let start_time = std::time::Instant::now();

        if text.trim().is_empty() {
            return Ok(VerificationResult::from_claims(Vec::new(), 0.0));
        }

        let extracted = self.extract_claims(text).await.inspect_err(|e| {
            tracing::warn!(error = %e, "Claim extraction failed");
        })?;
        let claims = check_claims(extracted, passages);

        for claim in &claims {
            tracing::debug!(
                claim_id = %claim.id,
                confidence = claim.confidence,
                evidence = claim.evidence_count(),
                "Claim checked"
            );
        }

        let result = VerificationResult::from_claims(
            claims,
            start_time.elapsed().as_secs_f64() * 1000.0,
        );

        tracing::info!(
            total_claims = result.total_claims,
            verified_claims = result.verified_claims,
            overall_confidence = result.overall_confidence,
            elapsed_ms = start_time.elapsed().as_millis(),
            "Claim verification completed"
        );

        Ok(result)
    }
}
