//! Result delivery.
//!
//! Two sinks share one contract: deliver an owned payload, synchronously, on
//! the calling thread.
//!
//! - [`SignalSink`]: invokes registered callbacks with the JSON string.
//! - [`MessageSink`]: posts a [`ResultMessage`] on a `tokio::sync::broadcast`
//!   bus. Sending never blocks; lagging receivers lose old messages.
//!
//! [`ResultEmitter`] picks one per emission from the `use-signals` flag, so
//! the mode may be flipped while streaming.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::trace;

use crate::ipc::events::{RecognitionEvent, ResultKind, ResultMessage};

/// Broadcast channel capacity: 256 result messages buffered for slow consumers.
const MESSAGE_CAP: usize = 256;

/// Callback registered for signal mode. Runs on the streaming thread with the
/// session lock held, so it must not call back into the filter.
pub type ResultHandler = Arc<dyn Fn(&str) + Send + Sync>;

pub trait ResultSink: Send + Sync {
    fn deliver(&self, event: &RecognitionEvent);
}

#[derive(Default)]
pub struct SignalSink {
    handlers: RwLock<Vec<ResultHandler>>,
}

impl SignalSink {
    pub fn connect(&self, handler: ResultHandler) {
        self.handlers.write().push(handler);
    }
}

impl ResultSink for SignalSink {
    fn deliver(&self, event: &RecognitionEvent) {
        for handler in self.handlers.read().iter() {
            handler(&event.json);
        }
    }
}

pub struct MessageSink {
    tx: broadcast::Sender<ResultMessage>,
}

impl MessageSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(MESSAGE_CAP);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ResultMessage> {
        self.tx.subscribe()
    }
}

impl Default for MessageSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultSink for MessageSink {
    fn deliver(&self, event: &RecognitionEvent) {
        // No subscribers is not an error.
        let _ = self.tx.send(ResultMessage::from(event));
    }
}

/// Routes results to the sink selected by `use-signals`.
pub struct ResultEmitter {
    use_signals: AtomicBool,
    signals: SignalSink,
    messages: MessageSink,
    seq: AtomicU64,
}

impl ResultEmitter {
    pub fn new(use_signals: bool) -> Self {
        Self {
            use_signals: AtomicBool::new(use_signals),
            signals: SignalSink::default(),
            messages: MessageSink::new(),
            seq: AtomicU64::new(0),
        }
    }

    pub fn use_signals(&self) -> bool {
        self.use_signals.load(Ordering::Relaxed)
    }

    pub fn set_use_signals(&self, use_signals: bool) {
        self.use_signals.store(use_signals, Ordering::Relaxed);
    }

    pub fn connect(&self, handler: ResultHandler) {
        self.signals.connect(handler);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ResultMessage> {
        self.messages.subscribe()
    }

    /// Deliver `json` through the current sink.
    pub fn emit(&self, kind: ResultKind, json: String) {
        let event = RecognitionEvent {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            kind,
            json,
        };
        trace!(seq = event.seq, kind = ?event.kind, "emitting result");
        self.sink().deliver(&event);
    }

    fn sink(&self) -> &dyn ResultSink {
        if self.use_signals() {
            &self.signals
        } else {
            &self.messages
        }
    }
}
