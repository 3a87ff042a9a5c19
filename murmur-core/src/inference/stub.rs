//! `StubBackend`: placeholder engine that reports audio metadata instead of
//! transcribing.
//!
//! Lets the whole filter (loader, session, polling policy, emitters) run
//! end-to-end without a real model. Every `utterance_ms` of accepted audio it
//! reports an utterance boundary; in between, the partial hypothesis grows
//! once per 500 ms of audio. Payloads use the engine's pretty JSON layout so
//! the empty-payload sentinels apply.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::inference::json::{EMPTY_PARTIAL_RESULT, EMPTY_TEXT_RESULT};
use crate::inference::{AcceptStatus, Recognizer, SpeechBackend, SpeechModel};

const DEFAULT_UTTERANCE_MS: u64 = 2_000;
const PARTIAL_STEP_MS: u64 = 500;

#[derive(Debug, Clone)]
pub struct StubBackend {
    utterance_ms: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            utterance_ms: DEFAULT_UTTERANCE_MS,
        }
    }

    /// Report an utterance boundary every `utterance_ms` of audio.
    pub fn with_utterance_ms(utterance_ms: u64) -> Self {
        Self {
            utterance_ms: utterance_ms.max(PARTIAL_STEP_MS),
        }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechBackend for StubBackend {
    fn load_model(&self, path: &Path) -> Result<Arc<dyn SpeechModel>> {
        debug!(path = %path.display(), "stub model load is a no-op");
        Ok(Arc::new(StubModel {
            utterance_ms: self.utterance_ms,
        }))
    }
}

struct StubModel {
    utterance_ms: u64,
}

impl SpeechModel for StubModel {
    fn create_recognizer(&self, sample_rate: f32) -> Result<Box<dyn Recognizer>> {
        Ok(Box::new(StubRecognizer::new(sample_rate, self.utterance_ms)))
    }
}

pub struct StubRecognizer {
    sample_rate: f32,
    utterance_ms: u64,
    alternatives: u16,
    utterance: u32,
    /// Samples accepted in the current utterance.
    samples: u64,
    snapshot: String,
}

impl StubRecognizer {
    pub fn new(sample_rate: f32, utterance_ms: u64) -> Self {
        Self {
            sample_rate,
            utterance_ms,
            alternatives: 0,
            utterance: 0,
            samples: 0,
            snapshot: String::new(),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        if self.sample_rate <= 0.0 {
            return 0;
        }
        (self.samples as f64 * 1000.0 / f64::from(self.sample_rate)) as u64
    }

    fn take_text(&mut self) -> &str {
        if self.samples == 0 {
            self.snapshot = EMPTY_TEXT_RESULT.to_string();
            return &self.snapshot;
        }
        self.utterance += 1;
        let text = format!(
            "[stub: utterance {}, {} ms @ {} Hz]",
            self.utterance,
            self.elapsed_ms(),
            self.sample_rate
        );
        self.samples = 0;
        self.snapshot = if self.alternatives > 0 {
            format!(
                "{{\n  \"alternatives\" : [{{\n      \"confidence\" : 1.000000,\n      \"text\" : \"{text}\"\n    }}]\n}}"
            )
        } else {
            format!("{{\n  \"text\" : \"{text}\"\n}}")
        };
        &self.snapshot
    }
}

impl Recognizer for StubRecognizer {
    fn accept_waveform(&mut self, samples: &[i16]) -> Result<AcceptStatus> {
        let before = self.elapsed_ms();
        self.samples += samples.len() as u64;
        let after = self.elapsed_ms();

        if after >= self.utterance_ms {
            Ok(AcceptStatus::FinalReady)
        } else if after / PARTIAL_STEP_MS > before / PARTIAL_STEP_MS {
            Ok(AcceptStatus::PartialReady)
        } else {
            Ok(AcceptStatus::NoEvent)
        }
    }

    fn result(&mut self) -> Option<&str> {
        Some(self.take_text())
    }

    fn partial_result(&mut self) -> Option<&str> {
        let steps = self.elapsed_ms() / PARTIAL_STEP_MS;
        self.snapshot = if steps == 0 {
            EMPTY_PARTIAL_RESULT.to_string()
        } else {
            format!(
                "{{\n  \"partial\" : \"[stub: {} ms]\"\n}}",
                steps * PARTIAL_STEP_MS
            )
        };
        Some(&self.snapshot)
    }

    fn final_result(&mut self) -> Option<&str> {
        Some(self.take_text())
    }

    fn reset(&mut self) {
        debug!("StubRecognizer::reset");
        self.samples = 0;
    }

    fn set_max_alternatives(&mut self, alternatives: u16) {
        self.alternatives = alternatives;
    }
}
