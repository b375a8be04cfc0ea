use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, warn};

use crate::engine::{EngineError, EngineRequest, InferenceEngine};
use crate::runtime::cancel::CancellationToken;
use crate::runtime::multiplexer::{MuxSender, SampleMessage};
use crate::runtime::types::GenerationRequest;

/// Drives one of the `n` samples of a request.
///
/// Pulls events from the engine, stamps them with the sample index and pushes
/// them onto the multiplexer until a terminal event, an engine error or
/// cancellation. Exactly one terminal message is pushed in every case.
pub struct SampleTask {
    engine: Arc<dyn InferenceEngine>,
    request: EngineRequest,
    mux: MuxSender,
}

impl SampleTask {
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        request: &GenerationRequest,
        index: usize,
        cancel: CancellationToken,
        mux: MuxSender,
    ) -> Self {
        Self {
            engine,
            request: EngineRequest {
                prompt: Arc::clone(request.prompt()),
                request_id: request.request_id().to_owned(),
                sample_index: index,
                params: request.params().clone(),
                logprobs: request.logprobs(),
                cancel,
            },
            mux,
        }
    }

    pub async fn run(self) {
        let Self { engine, request, mux } = self;
        let index = request.sample_index;
        let request_id = request.request_id.clone();
        let cancel = request.cancel.clone();

        let started = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            started = engine.generate_stream(request) => Some(started),
        };
        let mut stream = match started {
            None => {
                mux.push(SampleMessage::Cancelled { index });
                return;
            }
            Some(Err(error)) => {
                warn!(request_id = %request_id, index, error = %error, "engine refused sample");
                mux.push(SampleMessage::Failed { index, error });
                return;
            }
            Some(Ok(stream)) => stream,
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                next = stream.next() => Some(next),
            };

            match next {
                // Cancelled: drop the engine stream so it releases its
                // resources, then report without forwarding anything else.
                None => {
                    drop(stream);
                    debug!(request_id = %request_id, index, "sample stopped on cancellation");
                    mux.push(SampleMessage::Cancelled { index });
                    return;
                }
                Some(Some(Ok(mut event))) => {
                    if cancel.is_cancelled() {
                        drop(stream);
                        debug!(request_id = %request_id, index, "sample stopped on cancellation");
                        mux.push(SampleMessage::Cancelled { index });
                        return;
                    }
                    event.index = index;
                    let terminal = event.finish_reason;
                    mux.push(SampleMessage::Event(event));
                    if let Some(reason) = terminal {
                        debug!(request_id = %request_id, index, finish_reason = %reason, "sample finished");
                        return;
                    }
                }
                Some(Some(Err(error))) => {
                    warn!(request_id = %request_id, index, error = %error, "sample failed");
                    mux.push(SampleMessage::Failed { index, error });
                    return;
                }
                Some(None) => {
                    warn!(request_id = %request_id, index, "engine stream ended without a finish reason");
                    mux.push(SampleMessage::Failed {
                        index,
                        error: EngineError::Truncated,
                    });
                    return;
                }
            }
        }
    }
}
