//! # murmur-core
//!
//! Streaming speech-recognition filter stage.
//!
//! ## Architecture
//!
//! ```text
//! host ──chain(AudioBuffer)──► stream lock ─► session lock
//!                                                 │
//!                                     Denoise (FrameAccumulator + suppressor)
//!                                                 │
//!                                      Recognizer::accept_waveform
//!                                                 │
//!                                        catch-up polling policy
//!                                                 │
//!                               ResultEmitter ─► callbacks | broadcast bus
//!
//! change_state ─► ModelLoader (murmur-model-loader thread) ─► session commit
//! ```
//!
//! Audio is forwarded unchanged apart from optional in-place denoising.
//! Model construction never runs on the data path.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod buffering;
pub mod config;
pub mod denoise;
pub mod engine;
pub mod error;
pub mod inference;
pub mod ipc;

// Convenience re-exports for downstream crates
pub use buffering::AudioBuffer;
pub use config::{load_settings, read_settings, save_settings, FilterSettings};
pub use engine::{
    DiagnosticsSnapshot, ElementState, PipelineHost, SinkEvent, SpeechFilter, StateChange,
    StateChangeReturn,
};
pub use error::FilterError;
pub use inference::json::NumberFormat;
pub use inference::stub::StubBackend;
pub use inference::{AcceptStatus, Recognizer, SpeechBackend, SpeechModel};
pub use ipc::events::{LifecyclePhase, PhaseEvent, RecognitionEvent, ResultKind, ResultMessage};

#[cfg(feature = "vosk")]
pub use inference::VoskBackend;
