//! Merges the answer stream with the background verification task

use std::time::Instant;

use futures::StreamExt;
use url::Url;

use super::collaborators::{GenerationChunk, TokenStream};
use super::sink::{EventSink, Halt};
use super::verification::BackgroundVerification;
use crate::model::events::citations;
use crate::model::search::clamp_unit;
use crate::model::{Passage, PipelineEvent, SourceCitation};

/// Keep citations that point at one of the passages, with scores clamped to `[0, 1]`
fn sanitize_citations(sources: Vec<SourceCitation>, passages: &[Passage]) -> Vec<SourceCitation> {
    sources
        .into_iter()
        .filter(|citation| cites_passage(&citation.url, passages))
        .map(|citation| SourceCitation {
            relevance_score: clamp_unit(citation.relevance_score),
            ..citation
        })
        .collect()
}

fn cites_passage(url: &str, passages: &[Passage]) -> bool {
    match Url::parse(url) {
        Ok(url) => passages.iter().any(|p| p.source_url == url),
        Err(_) => false,
    }
}

/// Forward generated tokens, launching and then resolving verification.
///
/// `Sources` goes out with the first chunk, using the generator's citations when
/// it supplies usable ones and citations built from `passages` otherwise. A
/// verification outcome is emitted once, after the last token. Returns the
/// assembled answer.
pub(crate) async fn merge_stream(
    sink: &EventSink,
    mut stream: TokenStream,
    verification: &mut BackgroundVerification,
    passages: &[Passage],
    run_started: Instant,
) -> Result<String, Halt> {
    let mut answer = String::new();
    let mut token_count = 0usize;
    let mut sources_sent = false;

    loop {
        let next = tokio::select! {
            biased;
            _ = sink.cancelled() => return Err(Halt::Cancelled),
            next = stream.next() => next,
            _ = verification.wait_running(), if verification.is_running() => continue,
        };

        let GenerationChunk { token, sources } = match next {
            None => break,
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                tracing::error!(error = %e, tokens = token_count, "Generation stream failed");
                return Err(Halt::Failed(format!("Generation failed: {}", e)));
            }
        };

        if !sources_sent && (sources.is_some() || !token.is_empty()) {
            let sources = sources
                .map(|s| sanitize_citations(s, passages))
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| citations(passages));
            sink.emit(PipelineEvent::Sources { sources }).await?;
            sources_sent = true;
        }

        if token.is_empty() {
            continue;
        }

        if token_count == 0 {
            tracing::info!(
                first_token_ms = run_started.elapsed().as_millis(),
                "First token streamed"
            );
        }
        answer.push_str(&token);
        token_count += 1;
        sink.emit(PipelineEvent::Token { content: token }).await?;

        verification.on_token(token_count, &answer);
    }

    tracing::info!(
        tokens = token_count,
        answer_length = answer.len(),
        "Generation stream completed"
    );

    if let Some(outcome) = sink.guard(verification.resolve(&answer)).await? {
        sink.emit(outcome.into_event()).await?;
    }

    Ok(answer)
}
