//! Inference engine boundary.
//!
//! The runtime only consumes engines: it asks for a lazy stream of
//! [`GenerationEvent`]s per sample and stops polling it when the request is
//! cancelled. Engines are expected to watch the [`CancellationToken`] they
//! are handed at their own safe points (usually between tokens) and to
//! release resources when their stream is dropped.

pub mod echo;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::api::sampling::SamplingParams;
use crate::runtime::cancel::CancellationToken;
use crate::runtime::types::GenerationEvent;

pub use echo::{EchoEngine, EchoLoader};

/// Stream of events for one sample.
pub type EventStream = BoxStream<'static, Result<GenerationEvent, EngineError>>;

/// Everything an engine needs to generate one sample.
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub prompt: Arc<str>,
    pub request_id: String,
    pub sample_index: usize,
    /// Private copy; engines may consume sampler state freely.
    pub params: SamplingParams,
    /// Number of top log-probabilities to report per token.
    pub logprobs: u32,
    pub cancel: CancellationToken,
}

/// Errors raised at the engine boundary.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Generation failed mid-stream.
    #[error("generation failed: {message}")]
    Generation { message: String },

    /// The stream ended without ever yielding a finish reason.
    #[error("engine stream ended before a finish reason was produced")]
    Truncated,

    /// The sample task panicked.
    #[error("sample task panicked: {message}")]
    Panicked { message: String },

    /// A model could not be loaded.
    #[error("failed to load model '{model}': {message}")]
    LoadFailed { model: String, message: String },
}

impl EngineError {
    pub fn generation(message: impl Into<String>) -> Self {
        EngineError::Generation {
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait InferenceEngine: Send + Sync + 'static {
    /// Name of the loaded model.
    fn model_name(&self) -> &str;

    /// Start generating one sample.
    ///
    /// Errors returned here, and errors yielded by the stream, fail the
    /// sample and with it the whole request.
    async fn generate_stream(&self, request: EngineRequest) -> Result<EventStream, EngineError>;
}

/// Turns a model name into a ready engine.
#[async_trait]
pub trait EngineLoader: Send + Sync + 'static {
    async fn load(&self, model: &str) -> Result<Arc<dyn InferenceEngine>, EngineError>;
}
