//! Destinations for driver output: a live stream or a batch accumulator.

use tokio::sync::mpsc;

use crate::api::completion::CompletionResponse;
use crate::engine::EngineError;
use crate::runtime::assembler::ResponseAssembler;
use crate::runtime::types::GenerationEvent;

/// Where the [`StreamDriver`] writes. Only the driver calls these methods.
///
/// [`StreamDriver`]: crate::runtime::driver::StreamDriver
pub trait FragmentSink: Send {
    /// Deliver one event. Returns `false` once the client is gone.
    fn emit(&mut self, event: GenerationEvent) -> bool;

    /// Every sample finished.
    fn complete(&mut self) {}

    /// A sample failed and the request was torn down.
    fn fail(&mut self, _index: usize, _error: &EngineError) {}
}

/// One unit written to a streaming client.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Fragment(CompletionResponse),
    /// End-of-stream sentinel.
    Done,
    Error { message: String },
}

/// Streaming sink: one fragment per event, then `Done` or a single `Error`.
#[derive(Debug)]
pub struct StreamSink {
    request_id: String,
    assembler: ResponseAssembler,
    tx: mpsc::UnboundedSender<StreamFrame>,
}

impl StreamSink {
    pub fn new(request_id: impl Into<String>, assembler: ResponseAssembler, tx: mpsc::UnboundedSender<StreamFrame>) -> Self {
        Self {
            request_id: request_id.into(),
            assembler,
            tx,
        }
    }
}

impl FragmentSink for StreamSink {
    fn emit(&mut self, event: GenerationEvent) -> bool {
        let fragment = self.assembler.fragment(&event);
        self.tx.send(StreamFrame::Fragment(fragment)).is_ok()
    }

    fn complete(&mut self) {
        let _ = self.tx.send(StreamFrame::Done);
    }

    fn fail(&mut self, _index: usize, _error: &EngineError) {
        let _ = self.tx.send(StreamFrame::Error {
            message: format!(
                "Completion {} aborted. Please check the server console.",
                self.request_id
            ),
        });
    }
}

/// Batch sink: folds every sample's events into one accumulated terminal
/// event per sample.
#[derive(Debug)]
pub struct BatchCollector {
    slots: Vec<Option<GenerationEvent>>,
}

impl BatchCollector {
    pub fn new(n: usize) -> Self {
        Self { slots: vec![None; n] }
    }

    /// Accumulated generations in sample-index order. Samples that never
    /// reached a terminal event are left out.
    pub fn into_generations(self) -> Vec<GenerationEvent> {
        self.slots
            .into_iter()
            .flatten()
            .filter(GenerationEvent::is_terminal)
            .collect()
    }
}

impl FragmentSink for BatchCollector {
    fn emit(&mut self, event: GenerationEvent) -> bool {
        let index = event.index;
        if index >= self.slots.len() {
            self.slots.resize(index + 1, None);
        }
        match self.slots[index].as_mut() {
            None => self.slots[index] = Some(event),
            Some(acc) => {
                acc.text.push_str(&event.text);
                acc.token_probs.extend(event.token_probs);
                acc.top_logprobs.extend(event.top_logprobs);
                acc.offsets.extend(event.offsets);
                acc.finish_reason = event.finish_reason.or(acc.finish_reason);
                acc.prompt_tokens = event.prompt_tokens.or(acc.prompt_tokens);
                acc.generated_tokens = event.generated_tokens.or(acc.generated_tokens);
            }
        }
        true
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
