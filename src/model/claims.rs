use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use url::Url;

use super::search::clamp_unit;

/// Claims above this confidence count as verified
pub const VERIFIED_THRESHOLD: f32 = 0.6;

/// LLM-extractable list of factual claims
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExtractedClaims {
    /// Short, self-contained factual statements taken from the answer
    pub claims: Vec<String>,
}

/// A located excerpt supporting a claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceSpan {
    pub text: String,
    pub source_url: Url,
    pub confidence: f32,
    pub start_pos: usize,
    pub end_pos: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomicClaim {
    pub id: String,
    pub text: String,
    pub evidence_spans: Vec<EvidenceSpan>,
    pub confidence: f32,
    pub has_conflict: bool,
    pub uncertainty: bool,
    pub uncertainty_reason: Option<String>,
}

impl AtomicClaim {
    pub fn evidence_count(&self) -> usize {
        self.evidence_spans.len()
    }

    pub fn is_verified(&self) -> bool {
        self.confidence > VERIFIED_THRESHOLD
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub claims: Vec<AtomicClaim>,
    pub total_claims: usize,
    pub verified_claims: usize,
    pub conflicted_claims: usize,
    pub uncertain_claims: usize,
    pub overall_confidence: f32,
    pub processing_time_ms: f64,
}

impl VerificationResult {
    /// Summarise a set of checked claims
    pub fn from_claims(claims: Vec<AtomicClaim>, processing_time_ms: f64) -> Self {
        let total_claims = claims.len();
        let verified_claims = claims.iter().filter(|c| c.is_verified()).count();
        let conflicted_claims = claims.iter().filter(|c| c.has_conflict).count();
        let uncertain_claims = claims.iter().filter(|c| c.uncertainty).count();
        let overall_confidence = if claims.is_empty() {
            0.0
        } else {
            let confidence_sum: f32 = claims.iter().map(|c| c.confidence).sum();
            clamp_unit(confidence_sum / total_claims as f32)
        };

        Self {
            claims,
            total_claims,
            verified_claims,
            conflicted_claims,
            uncertain_claims,
            overall_confidence,
            processing_time_ms,
        }
    }
}
