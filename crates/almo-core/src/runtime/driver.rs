//! The per-request consumer loop.
//!
//! [`StreamDriver::drive`] owns the whole lifetime of a request: it creates
//! the cancellation token and multiplexer, spawns the disconnect monitor and
//! the sample tasks, drains events into a [`FragmentSink`] and decides the
//! terminal [`RequestState`]. It only returns after the monitor and every
//! sample task have exited.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::api::completion::CompletionResponse;
use crate::engine::{EngineError, InferenceEngine};
use crate::runtime::assembler::ResponseAssembler;
use crate::runtime::cancel::CancellationToken;
use crate::runtime::monitor::{ConnectionProbe, DisconnectMonitor};
use crate::runtime::multiplexer::{self, SampleMessage};
use crate::runtime::sample::SampleTask;
use crate::runtime::sink::{BatchCollector, FragmentSink, StreamFrame, StreamSink};
use crate::runtime::types::{GenerationRequest, RequestState, RuntimeError};

#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// How often the disconnect monitor polls client liveness.
    pub disconnect_poll_interval: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            disconnect_poll_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Clone)]
pub struct StreamDriver {
    engine: Arc<dyn InferenceEngine>,
    config: DriverConfig,
}

impl std::fmt::Debug for StreamDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamDriver")
            .field("model", &self.engine.model_name())
            .field("config", &self.config)
            .finish()
    }
}

impl StreamDriver {
    pub fn new(engine: Arc<dyn InferenceEngine>, config: DriverConfig) -> Self {
        Self { engine, config }
    }

    /// Streaming mode: fragments, then `Done`, go to `tx`.
    ///
    /// The closed state of `tx` doubles as the liveness probe.
    pub async fn stream(
        &self,
        request: &GenerationRequest,
        tx: mpsc::UnboundedSender<StreamFrame>,
    ) -> Result<(), RuntimeError> {
        let probe = tx.clone();
        let mut sink = StreamSink::new(request.request_id(), ResponseAssembler::for_request(request), tx);
        let state = self.drive(request, probe, &mut sink).await;
        outcome(request, state)
    }

    /// Batch mode: one aggregated response once every sample has finished.
    pub async fn collect<P: ConnectionProbe>(
        &self,
        request: &GenerationRequest,
        probe: P,
    ) -> Result<CompletionResponse, RuntimeError> {
        let mut sink = BatchCollector::new(request.n());
        let state = self.drive(request, probe, &mut sink).await;
        outcome(request, state)?;
        Ok(ResponseAssembler::for_request(request).aggregate(&sink.into_generations()))
    }

    /// Run one request to a terminal state.
    pub async fn drive<P, S>(&self, request: &GenerationRequest, probe: P, sink: &mut S) -> RequestState
    where
        P: ConnectionProbe,
        S: FragmentSink,
    {
        let request_id = request.request_id();
        let n = request.n();
        debug!(request_id, n, model = self.engine.model_name(), "generation started");

        let cancel = CancellationToken::new();
        let (mux_tx, mut mux_rx) = multiplexer::channel();
        let monitor = DisconnectMonitor::spawn(
            probe,
            cancel.clone(),
            self.config.disconnect_poll_interval,
            request_id.to_owned(),
        );

        let mut tasks = JoinSet::new();
        let mut task_index = HashMap::with_capacity(n);
        for index in 0..n {
            let task = SampleTask::new(
                Arc::clone(&self.engine),
                request,
                index,
                cancel.clone(),
                mux_tx.clone(),
            );
            let handle = tasks.spawn(task.run());
            task_index.insert(handle.id(), index);
        }
        // Only the sample tasks hold senders from here on.
        drop(mux_tx);

        let mut finished = vec![false; n];
        let mut remaining = n;
        let mut mux_closed = false;
        let mut state = RequestState::Running;

        while !state.is_terminal() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    state = RequestState::Aborted;
                }
                message = mux_rx.recv(), if !mux_closed => {
                    state = match message {
                        Some(SampleMessage::Event(event)) => {
                            let index = event.index;
                            let terminal = event.is_terminal();
                            if !sink.emit(event) {
                                RequestState::Aborted
                            } else if terminal && !finished[index] {
                                finished[index] = true;
                                remaining -= 1;
                                if remaining == 0 {
                                    RequestState::Completed
                                } else {
                                    RequestState::Running
                                }
                            } else {
                                RequestState::Running
                            }
                        }
                        Some(SampleMessage::Failed { index, error }) => RequestState::Failed { index, error },
                        // Only sent after the token tripped.
                        Some(SampleMessage::Cancelled { .. }) => RequestState::Aborted,
                        // Every sender is gone without all terminals: a task
                        // died. Let the join branch say how.
                        None => {
                            mux_closed = true;
                            vanished(&tasks, &finished)
                        }
                    };
                }
                Some(joined) = tasks.join_next_with_id(), if !tasks.is_empty() => {
                    state = match joined {
                        Err(err) if err.is_panic() => {
                            let index = task_index.get(&err.id()).copied().unwrap_or(0);
                            RequestState::Failed {
                                index,
                                error: EngineError::Panicked { message: panic_message(err) },
                            }
                        }
                        _ if mux_closed => vanished(&tasks, &finished),
                        _ => RequestState::Running,
                    };
                }
            }
        }

        match &state {
            RequestState::Completed => {}
            RequestState::Aborted => {
                info!(request_id, "Completion generation cancelled by user");
            }
            RequestState::Failed { index, error } => {
                error!(request_id, index, error = %error, "Completion generation failed; cancelling sibling samples");
            }
            RequestState::Running => {}
        }

        // Wind down: stop polling, trip the token for any sibling still
        // running and wait for every sample task to observe it.
        monitor.stop().await;
        if !matches!(state, RequestState::Completed) {
            cancel.cancel();
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                if err.is_panic() {
                    warn!(request_id, error = %err, "sample task panicked during shutdown");
                }
            }
        }
        debug!(request_id, undelivered = mux_rx.len(), "all sample tasks stopped");

        match &state {
            RequestState::Completed => {
                sink.complete();
                info!(request_id, n, "Finished completion request");
            }
            RequestState::Failed { index, error } => sink.fail(*index, error),
            RequestState::Aborted | RequestState::Running => {}
        }
        state
    }
}

/// State after the multiplexer closed early: keep waiting while tasks remain
/// to be joined, otherwise the first unfinished sample was truncated.
fn vanished(tasks: &JoinSet<()>, finished: &[bool]) -> RequestState {
    if !tasks.is_empty() {
        return RequestState::Running;
    }
    RequestState::Failed {
        index: finished.iter().position(|done| !done).unwrap_or(0),
        error: EngineError::Truncated,
    }
}

fn outcome(request: &GenerationRequest, state: RequestState) -> Result<(), RuntimeError> {
    match state {
        RequestState::Completed => Ok(()),
        RequestState::Failed { index, error } => Err(RuntimeError::SampleFailed {
            request_id: request.request_id().to_owned(),
            index,
            source: error,
        }),
        RequestState::Aborted | RequestState::Running => Err(RuntimeError::Aborted {
            request_id: request.request_id().to_owned(),
        }),
    }
}

fn panic_message(err: JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_owned()),
        Err(err) => err.to_string(),
    }
}
