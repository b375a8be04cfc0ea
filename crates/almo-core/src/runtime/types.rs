use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

use crate::api::sampling::SamplingParams;
use crate::engine::EngineError;

/// Why a sample stopped producing tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FinishReason {
    /// A stop sequence or end-of-sequence token was produced.
    Stop,
    /// The token budget was exhausted.
    Length,
    Error,
    Abort,
}

/// One update produced by an inference engine for one sample.
///
/// Only the terminal event of a sample carries a `finish_reason`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationEvent {
    /// Sample index, stamped by the sample task.
    pub index: usize,
    /// Incremental text produced since the previous event.
    pub text: String,
    /// Chosen tokens with their log-probabilities, in generation order.
    pub token_probs: Vec<(String, f32)>,
    /// Top-k alternatives per chosen token.
    pub top_logprobs: Vec<BTreeMap<String, f32>>,
    /// Character offsets of each chosen token in the completion text.
    pub offsets: Vec<usize>,
    pub finish_reason: Option<FinishReason>,
    /// Running prompt token count, when the engine reports it.
    pub prompt_tokens: Option<u32>,
    /// Running generated token count, when the engine reports it.
    pub generated_tokens: Option<u32>,
}

impl GenerationEvent {
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn finished(text: impl Into<String>, reason: FinishReason) -> Self {
        Self {
            text: text.into(),
            finish_reason: Some(reason),
            ..Self::default()
        }
    }

    pub fn with_usage(mut self, prompt_tokens: u32, generated_tokens: u32) -> Self {
        self.prompt_tokens = Some(prompt_tokens);
        self.generated_tokens = Some(generated_tokens);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.finish_reason.is_some()
    }
}

/// An accepted completion request. Immutable once built; each sample task
/// receives its own clone of the sampling parameters.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    request_id: String,
    model: String,
    prompt: Arc<str>,
    n: usize,
    params: SamplingParams,
    logprobs: u32,
}

impl GenerationRequest {
    /// Validate and accept a request.
    ///
    /// Fails with [`RuntimeError::InvalidRequest`] when `n` is zero or the
    /// sampling parameters are out of range. Nothing is spawned on failure.
    pub fn new(
        request_id: impl Into<String>,
        model: impl Into<String>,
        prompt: impl Into<Arc<str>>,
        n: usize,
        params: SamplingParams,
    ) -> Result<Self, RuntimeError> {
        if n == 0 {
            return Err(RuntimeError::InvalidRequest {
                message: "n must be at least 1".to_owned(),
            });
        }
        params.validate().map_err(|e| RuntimeError::InvalidRequest {
            message: e.to_string(),
        })?;

        Ok(Self {
            request_id: request_id.into(),
            model: model.into(),
            prompt: prompt.into(),
            n,
            params,
            logprobs: 0,
        })
    }

    /// Re-stamp the serving model, e.g. once an inline model switch resolved
    /// which engine handles an already validated request.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Number of top log-probabilities to report per token (`0` disables).
    pub fn with_logprobs(mut self, logprobs: u32) -> Self {
        self.logprobs = logprobs;
        self
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn prompt(&self) -> &Arc<str> {
        &self.prompt
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn params(&self) -> &SamplingParams {
        &self.params
    }

    pub fn logprobs(&self) -> u32 {
        self.logprobs
    }
}

/// Lifecycle of one request inside the [`StreamDriver`].
///
/// [`StreamDriver`]: crate::runtime::driver::StreamDriver
#[derive(Debug, Clone)]
pub enum RequestState {
    Running,
    /// Every sample reported a terminal event.
    Completed,
    /// The client went away; nothing more is written.
    Aborted,
    /// A sample failed; siblings were cancelled.
    Failed { index: usize, error: EngineError },
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestState::Running)
    }
}

/// Request-level errors surfaced by the runtime.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    /// Rejected before any sample task was spawned.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// The client disconnected and generation was cancelled.
    #[error("request {request_id} aborted by client disconnect")]
    Aborted { request_id: String },

    /// One sample's engine call failed; the whole request fails with it.
    #[error("sample {index} of request {request_id} failed: {source}")]
    SampleFailed {
        request_id: String,
        index: usize,
        source: EngineError,
    },
}
