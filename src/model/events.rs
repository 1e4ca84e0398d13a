//! Events flowing out of a pipeline run and their outward projections

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::claims::{AtomicClaim, VerificationResult};
use super::search::{Passage, ellipsize};

/// Maximum number of citations attached to an answer
pub const MAX_CITATIONS: usize = 6;
const CITATION_EXCERPT_CHARS: usize = 200;
const EVIDENCE_SNIPPET_CHARS: usize = 150;
/// Evidence spans carry no score of their own
const DEFAULT_EVIDENCE_RELEVANCE: f32 = 0.8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SourceCitation {
    pub url: String,
    pub title: String,
    pub excerpt: String,
    pub relevance_score: f32,
}

impl From<&Passage> for SourceCitation {
    fn from(passage: &Passage) -> Self {
        Self {
            url: passage.source_url.to_string(),
            title: passage.source_title.clone(),
            excerpt: ellipsize(&passage.text, CITATION_EXCERPT_CHARS),
            relevance_score: passage.relevance_score,
        }
    }
}

/// Citations for the leading passages, in passage order
pub fn citations(passages: &[Passage]) -> Vec<SourceCitation> {
    passages
        .iter()
        .take(MAX_CITATIONS)
        .map(SourceCitation::from)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EvidenceReference {
    pub source_url: String,
    pub snippet: String,
    pub confidence: f32,
    pub relevance_score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ClaimView {
    pub id: String,
    pub text: String,
    pub confidence: f32,
    pub evidence_count: usize,
    pub has_conflict: bool,
    pub uncertainty: bool,
    pub uncertainty_reason: Option<String>,
    pub evidence_references: Vec<EvidenceReference>,
}

impl From<&AtomicClaim> for ClaimView {
    fn from(claim: &AtomicClaim) -> Self {
        Self {
            id: claim.id.clone(),
            text: claim.text.clone(),
            confidence: claim.confidence,
            evidence_count: claim.evidence_count(),
            has_conflict: claim.has_conflict,
            uncertainty: claim.uncertainty,
            uncertainty_reason: claim.uncertainty_reason.clone(),
            evidence_references: claim
                .evidence_spans
                .iter()
                .map(|span| EvidenceReference {
                    source_url: span.source_url.to_string(),
                    snippet: ellipsize(&span.text, EVIDENCE_SNIPPET_CHARS),
                    confidence: span.confidence,
                    relevance_score: DEFAULT_EVIDENCE_RELEVANCE,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct VerificationSummary {
    pub total_claims: usize,
    pub verified_claims: usize,
    pub uncertain_claims: usize,
    pub overall_confidence: f32,
    pub processing_time_ms: f64,
}

/// Outward form of a [`VerificationResult`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct VerificationReport {
    pub claims: Vec<ClaimView>,
    pub cva_summary: VerificationSummary,
}

impl From<&VerificationResult> for VerificationReport {
    fn from(result: &VerificationResult) -> Self {
        Self {
            claims: result.claims.iter().map(ClaimView::from).collect(),
            cva_summary: VerificationSummary {
                total_claims: result.total_claims,
                verified_claims: result.verified_claims,
                uncertain_claims: result.uncertain_claims,
                overall_confidence: result.overall_confidence,
                processing_time_ms: result.processing_time_ms,
            },
        }
    }
}

/// One unit of output from a pipeline run.
///
/// A run emits exactly one `Start` first and ends with `Done` or a terminal `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    Start {
        message_id: Uuid,
    },
    Token {
        content: String,
    },
    Sources {
        sources: Vec<SourceCitation>,
    },
    #[serde(rename = "claims")]
    Verification(VerificationReport),
    #[serde(rename = "cva_error")]
    VerificationError {
        message: String,
    },
    Error {
        message: String,
        #[serde(default)]
        fallback: bool,
    },
    Done,
}

impl PipelineEvent {
    pub fn token(content: impl Into<String>) -> Self {
        Self::Token {
            content: content.into(),
        }
    }
}
