//! OpenAI-compatible `/v1/completions` request body.
//!
//! The structures here are kept compatible with the OpenAI REST API so that
//! existing SDK clients work without modification. Sampler fields are
//! flattened into the top-level object.

use almo_core::api::SamplingParams;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A single prompt or a batch of prompt lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum Prompt {
    Text(String),
    Lines(Vec<String>),
}

impl Prompt {
    /// Prompt text handed to the engine; lines are joined with `\n`.
    pub fn into_text(self) -> String {
        match self {
            Prompt::Text(text) => text,
            Prompt::Lines(lines) => lines.join("\n"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StreamOptions {
    #[serde(default)]
    pub include_usage: bool,
}

/// Request body for `POST /v1/completions`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CompletionRequest {
    pub prompt: Prompt,
    /// Model to use. Naming a model other than the loaded one triggers an
    /// inline model switch (admin keys only).
    #[serde(default)]
    pub model: Option<String>,
    /// When `true`, fragments are streamed using SSE.
    #[serde(default)]
    pub stream: bool,
    /// Accepted for compatibility. Streamed fragments always carry usage
    /// once the engine reports token counts.
    #[serde(default)]
    pub stream_options: Option<StreamOptions>,
    /// Number of top log-probabilities to return per token.
    #[serde(default)]
    pub logprobs: Option<u32>,
    /// Number of independent samples to generate.
    #[serde(default = "default_n")]
    pub n: usize,
    /// Accepted for compatibility; ignored.
    #[serde(default)]
    pub best_of: Option<u32>,
    /// Accepted for compatibility; ignored.
    #[serde(default)]
    pub echo: Option<bool>,
    /// Accepted for compatibility; ignored.
    #[serde(default)]
    pub suffix: Option<String>,
    /// Accepted for compatibility; ignored.
    #[serde(default)]
    pub user: Option<String>,
    /// Accepted for compatibility; ignored.
    #[serde(default)]
    pub response_format: Option<serde_json::Value>,
    #[serde(flatten)]
    pub sampling: SamplingParams,
}

fn default_n() -> usize {
    1
}

// ── Tests ──────────────────────────────────────────────────────────────────────
