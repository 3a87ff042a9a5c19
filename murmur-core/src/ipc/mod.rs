//! Result and lifecycle events leaving the filter.
//!
//! All payload types derive `serde::Serialize` + `serde::Deserialize` so a
//! host can forward them over its own bus unchanged.

pub mod events;
pub mod sink;

pub use events::{LifecyclePhase, PhaseEvent, RecognitionEvent, ResultKind, ResultMessage};
pub use sink::{MessageSink, ResultEmitter, ResultHandler, ResultSink, SignalSink};
