//! almo-core: the multi-sample text-generation runtime behind almo-server.
//!
//! A completion request asking for `n` samples is fanned out into `n`
//! [`SampleTask`]s that share one [`CancellationToken`] and one event
//! multiplexer. The [`StreamDriver`] drains the multiplexer, turns events into
//! response fragments through the [`ResponseAssembler`] and decides the
//! terminal state of the request.

mod runtime;

pub mod api;
pub mod engine;

pub use runtime::assembler::ResponseAssembler;
pub use runtime::cancel::CancellationToken;
pub use runtime::driver::{DriverConfig, StreamDriver};
pub use runtime::monitor::{connection_guard, ConnectionGuard, ConnectionProbe, DisconnectMonitor, GuardProbe};
pub use runtime::multiplexer::{MuxReceiver, MuxSender, SampleMessage};
pub use runtime::sample::SampleTask;
pub use runtime::sink::{BatchCollector, FragmentSink, StreamFrame, StreamSink};
pub use runtime::types::{FinishReason, GenerationEvent, GenerationRequest, RequestState, RuntimeError};
