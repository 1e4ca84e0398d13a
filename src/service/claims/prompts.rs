//! Prompts for claim extraction

/// Leading part of the answer claims are extracted from
pub const EXTRACTION_INPUT_CHARS: usize = 800;

/// System prompt for claim extraction
pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"You extract specific factual claims from an answer so they can be checked against sources.

## Rules

1. Extract concrete, checkable facts: who created something, what it is used for, which features it supports, dates and quantities.
2. Each claim must be a short, self-contained sentence that makes sense without the rest of the answer.
3. Skip generic statements such as "it is related to technology" and opinions or advice.
4. Prefer fewer, specific claims over many vague ones. Return at most 5.
5. Return an empty `claims` array when the text contains no factual claims."#;

/// Build extraction prompt from the answer text
pub fn build_extraction_prompt(answer: &str) -> String {
    let excerpt: String = answer.chars().take(EXTRACTION_INPUT_CHARS).collect();
    format!(
        r#"Extract specific factual claims from this text about its main topic:

{excerpt}

Good claims look like:
- "GGML was created by Georgi Gerganov"
- "GGML is used for running machine learning models on CPUs"
- "GGML supports 4-bit quantization""#
    )
}
