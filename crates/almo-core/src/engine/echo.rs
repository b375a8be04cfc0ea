//! Deterministic built-in engine.
//!
//! Streams the prompt back one word per event, each word carrying the
//! whitespace that preceded it. It is the default backend of the server and
//! the workhorse of the runtime tests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info};

use super::{EngineError, EngineLoader, EngineRequest, EventStream, InferenceEngine};
use crate::runtime::cancel::CancellationToken;
use crate::runtime::types::{FinishReason, GenerationEvent};

#[derive(Debug, Clone)]
pub struct EchoEngine {
    model: String,
    token_delay: Duration,
}

impl EchoEngine {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            token_delay: Duration::ZERO,
        }
    }

    /// Sleep this long before every token.
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }
}

#[async_trait]
impl InferenceEngine for EchoEngine {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate_stream(&self, request: EngineRequest) -> Result<EventStream, EngineError> {
        let tokens = tokenize(&request.prompt);
        debug!(
            request_id = %request.request_id,
            index = request.sample_index,
            prompt_tokens = tokens.len(),
            "echo generation started"
        );

        let state = EchoState {
            prompt_tokens: u32::try_from(tokens.len()).unwrap_or(u32::MAX),
            tokens,
            position: 0,
            generated: 0,
            emitted: String::new(),
            held: String::new(),
            emitted_chars: 0,
            max_tokens: request.params.max_tokens,
            stop: request.params.stop.into_iter().filter(|s| !s.is_empty()).collect(),
            logprobs: request.logprobs,
            delay: self.token_delay,
            cancel: request.cancel,
            finished: false,
        };

        let stream = futures::stream::unfold(state, |mut state| async move {
            let event = state.next_event().await?;
            Some((Ok::<_, EngineError>(event), state))
        });
        Ok(stream.boxed())
    }
}

/// Split `prompt` into words, each keeping the whitespace in front of it.
/// Leading and trailing whitespace of the whole prompt is dropped.
fn tokenize(prompt: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    for c in prompt.trim().chars() {
        if c.is_whitespace() && in_word {
            tokens.push(std::mem::take(&mut current));
            in_word = false;
        } else if !c.is_whitespace() {
            in_word = true;
        }
        current.push(c);
    }
    if in_word {
        tokens.push(current);
    }
    tokens
}

/// Byte position of the earliest stop-string match in `text`.
fn find_stop(text: &str, stop: &[String]) -> Option<usize> {
    stop.iter().filter_map(|s| text.find(s.as_str())).min()
}

/// Length of the longest tail of `text` that is a proper prefix of a stop
/// string. That tail is held back until the next token decides it.
fn partial_stop_len(text: &str, stop: &[String]) -> usize {
    stop.iter()
        .flat_map(|s| s.char_indices().skip(1).map(move |(i, _)| &s[..i]))
        .filter(|prefix| text.ends_with(prefix))
        .map(str::len)
        .max()
        .unwrap_or(0)
}

struct EchoState {
    tokens: Vec<String>,
    position: usize,
    prompt_tokens: u32,
    generated: u32,
    /// Text already sent.
    emitted: String,
    /// Produced text withheld because it may begin a stop string.
    held: String,
    emitted_chars: usize,
    max_tokens: u32,
    stop: Vec<String>,
    logprobs: u32,
    delay: Duration,
    cancel: CancellationToken,
    finished: bool,
}

impl EchoState {
    async fn next_event(&mut self) -> Option<GenerationEvent> {
        loop {
            if self.finished || self.cancel.is_cancelled() {
                return None;
            }
            if !self.delay.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => return None,
                    _ = tokio::time::sleep(self.delay) => {}
                }
            }

            if self.position >= self.tokens.len() {
                return Some(self.flush(FinishReason::Stop));
            }
            if self.generated >= self.max_tokens {
                return Some(self.flush(FinishReason::Length));
            }

            self.held.push_str(&self.tokens[self.position]);
            self.position += 1;
            self.generated += 1;

            let full = format!("{}{}", self.emitted, self.held);
            if let Some(cut) = find_stop(&full, &self.stop) {
                // Nothing sent so far can contain a match or a stop prefix,
                // so the cut always lands inside the held text.
                self.held = full.get(self.emitted.len()..cut).unwrap_or_default().to_owned();
                return Some(self.flush(FinishReason::Stop));
            }

            if self.position >= self.tokens.len() {
                return Some(self.flush(FinishReason::Stop));
            }
            if self.generated >= self.max_tokens {
                return Some(self.flush(FinishReason::Length));
            }

            let keep = partial_stop_len(&full, &self.stop).min(self.held.len());
            let split = self.held.len() - keep;
            let ready: String = self.held.drain(..split).collect();
            if !ready.is_empty() {
                return Some(self.emit(ready, None));
            }
        }
    }

    /// Send whatever is held and finish.
    fn flush(&mut self, reason: FinishReason) -> GenerationEvent {
        self.finished = true;
        let text = std::mem::take(&mut self.held);
        self.emit(text, Some(reason))
    }

    fn emit(&mut self, text: String, finish: Option<FinishReason>) -> GenerationEvent {
        let offset = self.emitted_chars;
        self.emitted_chars += text.chars().count();
        self.emitted.push_str(&text);

        let mut event = GenerationEvent {
            text,
            finish_reason: finish,
            ..GenerationEvent::default()
        }
        .with_usage(self.prompt_tokens, self.generated);

        let token = event.text.trim_start();
        if self.logprobs > 0 && !token.is_empty() {
            let token = token.to_owned();
            event.top_logprobs = vec![BTreeMap::from([(token.clone(), 0.0)])];
            event.token_probs = vec![(token, 0.0)];
            event.offsets = vec![offset];
        }
        event
    }
}

/// Loads an [`EchoEngine`] under whatever model name is requested.
#[derive(Debug, Clone, Default)]
pub struct EchoLoader {
    token_delay: Duration,
}

impl EchoLoader {
    pub fn new(token_delay: Duration) -> Self {
        Self { token_delay }
    }
}

#[async_trait]
impl EngineLoader for EchoLoader {
    async fn load(&self, model: &str) -> Result<Arc<dyn InferenceEngine>, EngineError> {
        if model.trim().is_empty() {
            return Err(EngineError::LoadFailed {
                model: model.to_owned(),
                message: "model name must not be empty".to_owned(),
            });
        }
        info!(model, "echo engine loaded");
        Ok(Arc::new(EchoEngine::new(model).with_token_delay(self.token_delay)))
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
