//! Query complexity classification

/// Queries longer than this many whitespace-separated tokens are complex
const MAX_SIMPLE_TOKENS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryComplexity {
    Simple,
    Complex,
}

/// Decide whether a query should be decomposed before searching
pub fn classify(query: &str) -> QueryComplexity {
    let lowered = query.to_lowercase();

    if lowered.split_whitespace().count() > MAX_SIMPLE_TOKENS {
        return QueryComplexity::Complex;
    }

    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let has = |word: &str| words.contains(&word);

    let connective = has("and") || has("vs");
    let mixed_questions = has("how") && has("what");
    let several_questions = lowered.matches('?').count() > 1;

    if connective || mixed_questions || several_questions {
        QueryComplexity::Complex
    } else {
        QueryComplexity::Simple
    }
}
