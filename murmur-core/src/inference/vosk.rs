//! libvosk backend via the `vosk` crate.
//!
//! The crate parses the engine's JSON into borrowed structs; we render them
//! back into the engine's pretty JSON layout so downstream consumers see the
//! same payloads as with the C API. Empty texts are reported as `None`.

use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use tracing::info;
use vosk::{CompleteResult, DecodingState, Model};

use crate::error::{FilterError, Result};
use crate::inference::{AcceptStatus, Recognizer, SpeechBackend, SpeechModel};

/// Loads libvosk models from a directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct VoskBackend;

impl VoskBackend {
    /// Silence libvosk's own logging unless `verbose`.
    pub fn new(verbose: bool) -> Self {
        vosk::set_log_level(if verbose {
            vosk::LogLevel::Info
        } else {
            vosk::LogLevel::Error
        });
        Self
    }
}

impl SpeechBackend for VoskBackend {
    fn load_model(&self, path: &Path) -> Result<Arc<dyn SpeechModel>> {
        let model_path = path.to_str().ok_or_else(|| FilterError::ModelNotFound {
            path: path.to_path_buf(),
        })?;
        let model = Model::new(model_path).ok_or_else(|| FilterError::ModelLoad {
            path: path.to_path_buf(),
        })?;
        info!(path = %path.display(), "vosk model loaded");
        Ok(Arc::new(VoskModel(model)))
    }
}

struct VoskModel(Model);

impl SpeechModel for VoskModel {
    fn create_recognizer(&self, sample_rate: f32) -> Result<Box<dyn Recognizer>> {
        let recognizer = vosk::Recognizer::new(&self.0, sample_rate).ok_or_else(|| {
            FilterError::Recognizer(format!("could not create recognizer at {sample_rate} Hz"))
        })?;
        Ok(Box::new(VoskRecognizer {
            inner: recognizer,
            snapshot: String::new(),
        }))
    }
}

struct VoskRecognizer {
    inner: vosk::Recognizer,
    snapshot: String,
}

impl VoskRecognizer {
    fn store(&mut self, value: Option<serde_json::Value>) -> Option<&str> {
        let value = value?;
        self.snapshot = serde_json::to_string_pretty(&value).ok()?;
        Some(&self.snapshot)
    }
}

fn complete_to_json(result: CompleteResult<'_>) -> Option<serde_json::Value> {
    match result {
        CompleteResult::Single(single) => {
            if single.text.is_empty() {
                return None;
            }
            Some(json!({ "text": single.text }))
        }
        CompleteResult::Multiple(multiple) => {
            let alternatives: Vec<_> = multiple
                .alternatives
                .iter()
                .map(|alt| json!({ "confidence": alt.confidence, "text": alt.text }))
                .collect();
            if multiple.alternatives.iter().all(|alt| alt.text.is_empty()) {
                return None;
            }
            Some(json!({ "alternatives": alternatives }))
        }
    }
}

impl Recognizer for VoskRecognizer {
    fn accept_waveform(&mut self, samples: &[i16]) -> Result<AcceptStatus> {
        match self.inner.accept_waveform(samples) {
            Ok(DecodingState::Finalized) => Ok(AcceptStatus::FinalReady),
            Ok(DecodingState::Running) => Ok(AcceptStatus::PartialReady),
            Ok(DecodingState::Failed) => {
                Err(FilterError::Recognizer("decoding failed".into()))
            }
            Err(e) => Err(FilterError::Recognizer(format!("{e:?}"))),
        }
    }

    fn result(&mut self) -> Option<&str> {
        let value = complete_to_json(self.inner.result());
        self.store(value)
    }

    fn partial_result(&mut self) -> Option<&str> {
        let partial = self.inner.partial_result();
        let value = (!partial.partial.is_empty()).then(|| json!({ "partial": partial.partial }));
        self.store(value)
    }

    fn final_result(&mut self) -> Option<&str> {
        let value = complete_to_json(self.inner.final_result());
        self.store(value)
    }

    fn reset(&mut self) {
        self.inner.reset();
    }

    fn set_max_alternatives(&mut self, alternatives: u16) {
        self.inner.set_max_alternatives(alternatives);
    }
}
