use tokio::sync::mpsc;

use crate::engine::EngineError;
use crate::runtime::types::GenerationEvent;

/// What a sample task can put on the multiplexer.
///
/// Every sample task sends exactly one terminal message: a terminal
/// `Event`, a `Failed`, or a `Cancelled` once the request token has tripped.
#[derive(Debug, Clone)]
pub enum SampleMessage {
    Event(GenerationEvent),
    Failed { index: usize, error: EngineError },
    Cancelled { index: usize },
}

impl SampleMessage {
    pub fn index(&self) -> usize {
        match self {
            SampleMessage::Event(event) => event.index,
            SampleMessage::Failed { index, .. } | SampleMessage::Cancelled { index } => *index,
        }
    }
}

/// Create the per-request multiplexer.
///
/// Unbounded so producers never wait on a slow or vanished consumer.
/// Per-sender FIFO keeps each sample's events in program order; nothing is
/// promised across samples.
pub fn channel() -> (MuxSender, MuxReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MuxSender { tx }, MuxReceiver { rx })
}

#[derive(Debug, Clone)]
pub struct MuxSender {
    tx: mpsc::UnboundedSender<SampleMessage>,
}

impl MuxSender {
    /// Returns `false` if the consumer has already gone away.
    pub fn push(&self, message: SampleMessage) -> bool {
        self.tx.send(message).is_ok()
    }
}

#[derive(Debug)]
pub struct MuxReceiver {
    rx: mpsc::UnboundedReceiver<SampleMessage>,
}

impl MuxReceiver {
    /// Next message, or `None` once every sender has been dropped.
    pub async fn recv(&mut self) -> Option<SampleMessage> {
        self.rx.recv().await
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
