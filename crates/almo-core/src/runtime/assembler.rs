//! Event → response conversion shared by the streaming and batch paths.

use chrono::Utc;

use crate::api::completion::{CompletionChoice, CompletionLogProbs, CompletionResponse, UsageStats};
use crate::runtime::types::{GenerationEvent, GenerationRequest};

/// Builds [`CompletionResponse`]s for one request.
///
/// Holds only the per-request constants (id, model, creation time) so every
/// fragment of a stream carries the same envelope. The conversions themselves
/// are pure.
#[derive(Debug, Clone)]
pub struct ResponseAssembler {
    id: String,
    model: String,
    created: i64,
}

impl ResponseAssembler {
    pub fn new(request_id: &str, model: impl Into<String>) -> Self {
        Self {
            id: format!("cmpl-{request_id}"),
            model: model.into(),
            created: Utc::now().timestamp(),
        }
    }

    pub fn for_request(request: &GenerationRequest) -> Self {
        Self::new(request.request_id(), request.model())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// One streamed fragment carrying a single choice.
    pub fn fragment(&self, event: &GenerationEvent) -> CompletionResponse {
        self.response(vec![choice(event)], usage(event))
    }

    /// Aggregated response for the batch path.
    ///
    /// `generations` holds one accumulated terminal event per sample. Choices
    /// are sorted by index and usage comes from the highest-index sample that
    /// reported counts, so it never depends on which sample finished last.
    pub fn aggregate(&self, generations: &[GenerationEvent]) -> CompletionResponse {
        let mut ordered: Vec<&GenerationEvent> = generations.iter().collect();
        ordered.sort_by_key(|event| event.index);
        let usage = ordered.iter().rev().find_map(|event| usage(event));
        let choices = ordered.into_iter().map(choice).collect();
        self.response(choices, usage)
    }

    fn response(&self, choices: Vec<CompletionChoice>, usage: Option<UsageStats>) -> CompletionResponse {
        CompletionResponse {
            id: self.id.clone(),
            object: "text_completion".to_owned(),
            created: self.created,
            model: self.model.clone(),
            choices,
            usage,
        }
    }
}

fn choice(event: &GenerationEvent) -> CompletionChoice {
    CompletionChoice {
        index: event.index,
        text: event.text.clone(),
        logprobs: logprobs(event),
        finish_reason: event.finish_reason,
    }
}

fn logprobs(event: &GenerationEvent) -> Option<CompletionLogProbs> {
    if event.token_probs.is_empty() {
        return None;
    }
    let (tokens, token_logprobs) = event.token_probs.iter().cloned().unzip();
    Some(CompletionLogProbs {
        text_offset: event.offsets.clone(),
        token_logprobs,
        tokens,
        top_logprobs: event.top_logprobs.clone(),
    })
}

fn usage(event: &GenerationEvent) -> Option<UsageStats> {
    if event.prompt_tokens.is_none() && event.generated_tokens.is_none() {
        return None;
    }
    let prompt_tokens = event.prompt_tokens.unwrap_or(0);
    let completion_tokens = event.generated_tokens.unwrap_or(0);
    Some(UsageStats {
        prompt_tokens,
        completion_tokens,
        total_tokens: prompt_tokens + completion_tokens,
    })
}

// ── Tests ──────────────────────────────────────────────────────────────────────
