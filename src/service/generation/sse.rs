//! Server-sent event decoding for streaming chat completions

use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;

use futures::{Stream, StreamExt, stream};
use serde_json::Value;

use crate::service::pipeline::GenerationError;

const DONE_MARKER: &str = "[DONE]";

struct SseState<S> {
    inner: Pin<Box<S>>,
    buffer: Vec<u8>,
    pending: VecDeque<Result<String, GenerationError>>,
    finished: bool,
}

impl<S> SseState<S> {
    fn drain_lines(&mut self) {
        while !self.finished {
            let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') else {
                break;
            };
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.handle_line(&line);
        }
    }

    fn handle_line(&mut self, line: &[u8]) {
        let line = String::from_utf8_lossy(line);
        let Some(data) = line.trim().strip_prefix("data:") else {
            return;
        };
        let data = data.trim();
        if data == DONE_MARKER {
            self.finished = true;
            return;
        }

        let value: Value = match serde_json::from_str(data) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed stream event");
                return;
            }
        };

        if let Some(error) = value.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Model stream reported an error")
                .to_string();
            self.pending
                .push_back(Err(GenerationError::backend(message, Some(error.clone()))));
            self.finished = true;
            return;
        }

        if let Some(content) = value["choices"][0]["delta"]["content"].as_str() {
            if !content.is_empty() {
                self.pending.push_back(Ok(content.to_string()));
            }
        }
    }
}

/// Decode an OpenAI-style `data:` event stream into content deltas.
///
/// Ends at `[DONE]` or end of input; a transport error or an `error` event
/// ends it with an `Err` item.
pub fn content_deltas<S, B, E>(bytes: S) -> impl Stream<Item = Result<String, GenerationError>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    let state = SseState {
        inner: Box::pin(bytes),
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.inner.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.extend_from_slice(chunk.as_ref());
                    state.drain_lines();
                }
                Some(Err(e)) => {
                    let error = GenerationError::Stream(e.to_string());
                    state.pending.push_back(Err(error));
                    state.finished = true;
                }
                None => {
                    let rest = std::mem::take(&mut state.buffer);
                    state.handle_line(&rest);
                    state.finished = true;
                }
            }
        }
    })
}
