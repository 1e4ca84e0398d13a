//! Fuzzy evidence matching between claims and passages

use strsim::normalized_levenshtein;

use crate::model::search::clamp_unit;
use crate::model::{AtomicClaim, EvidenceSpan, Passage};

/// A passage supports a claim when its best key-term score exceeds this
pub const MATCH_THRESHOLD: f32 = 0.70;
const MAX_KEY_TERMS: usize = 5;
/// Terms must be longer than this to count as key terms
const MIN_TERM_CHARS: usize = 3;
const MAX_SPANS_PER_CLAIM: usize = 2;
const SPAN_CHARS: usize = 200;
/// Text kept after the matched term in an evidence span
const SPAN_TRAILING_CHARS: usize = 50;
const SPAN_COUNT_WEIGHT: f32 = 0.4;
const SPAN_QUALITY_WEIGHT: f32 = 0.6;

pub const LOW_EVIDENCE_REASON: &str = "Low evidence support";

#[derive(Debug, Clone, Copy, PartialEq)]
struct TermMatch {
    score: f32,
    char_start: usize,
    term_chars: usize,
}

/// Lowercase one character at a time so character offsets still index the original text
fn fold_case(text: &str) -> String {
    text.chars()
        .map(|c| c.to_lowercase().next().unwrap_or(c))
        .collect()
}

/// The first few distinctive words of a claim, lowercased
pub fn key_terms(claim: &str) -> Vec<String> {
    fold_case(claim)
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| w.chars().count() > MIN_TERM_CHARS)
        .take(MAX_KEY_TERMS)
        .collect()
}

/// Words of `text` with their starting character offsets
fn word_spans(text: &str) -> Vec<(usize, &str)> {
    let mut spans = Vec::new();
    let mut current: Option<(usize, usize)> = None;

    for (char_idx, (byte_idx, c)) in text.char_indices().enumerate() {
        if c.is_whitespace() {
            if let Some((start_char, start_byte)) = current.take() {
                spans.push((start_char, &text[start_byte..byte_idx]));
            }
        } else if current.is_none() {
            current = Some((char_idx, byte_idx));
        }
    }
    if let Some((start_char, start_byte)) = current {
        spans.push((start_char, &text[start_byte..]));
    }

    spans
}

/// Best location of `term` in an already lowercased passage
fn best_term_match(term: &str, passage_lower: &str) -> Option<TermMatch> {
    let term_chars = term.chars().count();

    if let Some(byte_idx) = passage_lower.find(term) {
        return Some(TermMatch {
            score: 1.0,
            char_start: passage_lower[..byte_idx].chars().count(),
            term_chars,
        });
    }

    word_spans(passage_lower)
        .into_iter()
        .map(|(char_start, word)| {
            let word = word.trim_matches(|c: char| !c.is_alphanumeric());
            TermMatch {
                score: normalized_levenshtein(term, word) as f32,
                char_start,
                term_chars,
            }
        })
        .fold(None, |best: Option<TermMatch>, m| match best {
            Some(b) if b.score >= m.score => Some(b),
            _ => Some(m),
        })
}

/// Up to two spans from passages matching the claim's key terms
pub fn find_evidence(claim: &str, passages: &[Passage]) -> Vec<EvidenceSpan> {
    let terms = key_terms(claim);
    if terms.is_empty() {
        return Vec::new();
    }

    let mut spans = Vec::new();
    for passage in passages {
        let passage_lower = fold_case(&passage.text);
        let best = terms
            .iter()
            .filter_map(|term| best_term_match(term, &passage_lower))
            .fold(None, |best: Option<TermMatch>, m| match best {
                Some(b) if b.score >= m.score => Some(b),
                _ => Some(m),
            });

        let Some(found) = best.filter(|m| m.score > MATCH_THRESHOLD) else {
            continue;
        };

        let span_len = (found.term_chars + SPAN_TRAILING_CHARS).min(SPAN_CHARS);
        let mut start = found.char_start;
        let mut text: String = passage.text.chars().skip(start).take(span_len).collect();
        if text.trim().is_empty() {
            start = 0;
            text = passage.text.chars().take(SPAN_CHARS).collect();
        }
        let end = start + text.chars().count();

        spans.push(EvidenceSpan {
            text,
            source_url: passage.source_url.clone(),
            confidence: clamp_unit(found.score),
            start_pos: start,
            end_pos: end,
        });
        if spans.len() >= MAX_SPANS_PER_CLAIM {
            break;
        }
    }

    spans
}

/// Weighted span count and mean span confidence
pub fn claim_confidence(spans: &[EvidenceSpan]) -> f32 {
    if spans.is_empty() {
        return 0.0;
    }
    let count_score = (spans.len() as f32 / MAX_SPANS_PER_CLAIM as f32).min(1.0);
    let mean = spans.iter().map(|s| s.confidence).sum::<f32>() / spans.len() as f32;
    clamp_unit(SPAN_COUNT_WEIGHT * count_score + SPAN_QUALITY_WEIGHT * mean)
}

/// Check one claim against the passages
pub fn check_claim(id: String, text: String, passages: &[Passage]) -> AtomicClaim {
    let evidence_spans = find_evidence(&text, passages);
    let confidence = claim_confidence(&evidence_spans);
    let mut claim = AtomicClaim {
        id,
        text,
        evidence_spans,
        confidence,
        has_conflict: false,
        uncertainty: false,
        uncertainty_reason: None,
    };
    if !claim.is_verified() {
        claim.uncertainty = true;
        claim.uncertainty_reason = Some(LOW_EVIDENCE_REASON.to_string());
    }
    claim
}
