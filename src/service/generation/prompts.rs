//! Prompts for answer generation

use crate::model::Passage;

/// Passages included in the prompt
const PROMPT_PASSAGES: usize = 5;
const PASSAGE_CHARS: usize = 300;
/// Upper bound on the combined conversation and source context
const CONTEXT_CHARS: usize = 2000;

/// System prompt for answer generation
pub const ANSWER_SYSTEM_PROMPT: &str = "You are a helpful assistant. Provide clear, direct answers \
using the reference information. Write naturally without formal citations.";

/// Build the user prompt from the question, top passages and prior conversation
pub fn build_answer_prompt(query: &str, passages: &[Passage], context: Option<&str>) -> String {
    let mut full_context = String::new();

    if let Some(context) = context.filter(|c| !c.trim().is_empty()) {
        full_context.push_str(&format!("Previous conversation:\n{}\n\n", context));
    }

    if !passages.is_empty() {
        let sources = passages
            .iter()
            .take(PROMPT_PASSAGES)
            .enumerate()
            .map(|(i, p)| {
                let text: String = p.text.chars().take(PASSAGE_CHARS).collect();
                format!("Source {} ({}):\n{}...", i + 1, p.source_title, text)
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        full_context.push_str(&format!("Reference sources:\n{}\n\n", sources));
    }

    let capped: String = full_context.chars().take(CONTEXT_CHARS).collect();

    format!(
        r#"Context information:
{capped}

Answer this question clearly and naturally: {query}

Provide a comprehensive explanation without formal citations or academic style."#
    )
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use url::Url;

    use super::*;
    use crate::model::{Document, DocumentMetadata};

    fn passage(text: &str) -> Passage {
        let doc = Document {
            url: Url::parse("https://ggml.ai/").unwrap(),
            title: "GGML".to_string(),
            content: text.to_string(),
            excerpt: String::new(),
            fetched_at: Utc::now(),
            metadata: DocumentMetadata {
                source: "test".to_string(),
                query: "ggml".to_string(),
                rank: 0,
            },
        };
        Passage::new(text, &doc, 0.9)
    }

    #[test]
    fn test_prompt_includes_context_and_sources() {
        let prompt = build_answer_prompt(
            "What is GGML?",
            &[passage("GGML is a tensor library.")],
            Some("user: hi"),
        );

        assert!(prompt.contains("Previous conversation:\nuser: hi"));
        assert!(prompt.contains("Source 1 (GGML):\nGGML is a tensor library...."));
        assert!(prompt.contains("Answer this question clearly and naturally: What is GGML?"));
    }

    #[test]
    fn test_prompt_limits_passages_and_context() {
        let passages: Vec<Passage> = (0..8).map(|_| passage(&"x".repeat(1000))).collect();
        let prompt = build_answer_prompt("q", &passages, None);

        assert!(!prompt.contains("Source 6"));
        assert!(!prompt.contains(&"x".repeat(PASSAGE_CHARS + 1)));

        let long_context = "y".repeat(5000);
        let prompt = build_answer_prompt("q", &[], Some(&long_context));
        assert!(!prompt.contains(&"y".repeat(CONTEXT_CHARS)));
    }
}
