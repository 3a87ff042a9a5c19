//! Speech engine abstraction.
//!
//! Three traits mirror the engine's object model:
//!
//! - [`SpeechBackend`] loads a model from storage (slow, runs on the loader
//!   thread).
//! - [`SpeechModel`] builds recognizers bound to a sample rate.
//! - [`Recognizer`] consumes S16 samples and yields JSON result snapshots.
//!
//! Snapshots are returned as `&str` borrowed from the recognizer: they are
//! only valid until the next call and must be copied before being handed to
//! an emitter. `&mut self` everywhere expresses that decoders are stateful;
//! the session lock serialises every call.

pub mod json;
pub mod stub;

#[cfg(feature = "vosk")]
pub mod vosk;

#[cfg(feature = "vosk")]
pub use self::vosk::VoskBackend;

use std::path::Path;
use std::sync::Arc;

use crate::error::Result;

/// Outcome of feeding one buffer to a recognizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptStatus {
    /// Nothing new to report.
    NoEvent,
    /// Decoding continues; a partial hypothesis may be available.
    PartialReady,
    /// An utterance boundary was detected; a full result is ready.
    FinalReady,
}

/// A live, stateful recognizer.
pub trait Recognizer: Send + 'static {
    /// Feed mono S16 samples.
    ///
    /// # Errors
    /// Returns an error if the engine rejects the waveform.
    fn accept_waveform(&mut self, samples: &[i16]) -> Result<AcceptStatus>;

    /// Result for the current utterance (after `FinalReady`).
    fn result(&mut self) -> Option<&str>;

    /// In-progress hypothesis.
    fn partial_result(&mut self) -> Option<&str>;

    /// Flush the decoder and return whatever it has left.
    fn final_result(&mut self) -> Option<&str>;

    /// Drop decoding state, keeping the model.
    fn reset(&mut self);

    fn set_max_alternatives(&mut self, alternatives: u16);
}

/// A loaded model.
pub trait SpeechModel: Send + Sync + 'static {
    /// # Errors
    /// Returns an error if the engine refuses to build a recognizer.
    fn create_recognizer(&self, sample_rate: f32) -> Result<Box<dyn Recognizer>>;
}

/// Loads models from storage.
pub trait SpeechBackend: Send + Sync + 'static {
    /// Potentially very slow; never called on the data path.
    ///
    /// # Errors
    /// Returns an error if the model cannot be constructed.
    fn load_model(&self, path: &Path) -> Result<Arc<dyn SpeechModel>>;
}
