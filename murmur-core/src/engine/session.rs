//! Recognizer session: everything guarded by the session lock.
//!
//! `Session` owns the loaded model, the live recognizer built from it, the
//! outstanding load token, the previous-partial cache and the timestamps the
//! buffer engine keeps between buffers. It is always accessed through
//! `parking_lot::Mutex<Session>`; none of its methods lock anything
//! themselves.
//!
//! Invariants:
//! - a recognizer exists only if it was built with a non-zero rate;
//! - at most one recognizer and at most one load token are alive.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::engine::loader::CancellationToken;
use crate::error::{FilterError, Result};
use crate::inference::json::{is_empty_payload, Extraction, NumberFormat};
use crate::inference::{AcceptStatus, Recognizer, SpeechModel};

/// Upper bound for the alternatives property.
pub const MAX_ALTERNATIVES: u16 = 100;

pub struct Session {
    model: Option<Arc<dyn SpeechModel>>,
    recognizer: Option<Box<dyn Recognizer>>,
    /// Rate the live recognizer was built for, 0 when none.
    rate: u32,
    alternatives: u16,
    prev_partial: Option<String>,
    number_format: NumberFormat,
    /// Token of the load currently in flight, if any.
    pub(crate) token: Option<CancellationToken>,
    /// Timestamp of the last buffer whose results were polled.
    pub(crate) last_processed: Option<Duration>,
    /// Timestamp of the last partial (or full) result check.
    pub(crate) last_partial: Duration,
    /// Set by end-of-stream; no audio is recognized until a flush or reset.
    pub(crate) eos: bool,
}

impl Session {
    pub fn new(alternatives: u16, number_format: NumberFormat) -> Self {
        Self {
            model: None,
            recognizer: None,
            rate: 0,
            alternatives: alternatives.min(MAX_ALTERNATIVES),
            prev_partial: None,
            number_format,
            token: None,
            last_processed: None,
            last_partial: Duration::ZERO,
            eos: false,
        }
    }

    /// Keep `model` and build a recognizer for `rate`.
    ///
    /// With `rate == 0` the model is retained and the recognizer is built
    /// later by [`Session::rebind`]. Returns whether a recognizer is live.
    pub fn install(&mut self, model: Arc<dyn SpeechModel>, rate: u32) -> bool {
        self.recognizer = None;
        self.rate = 0;
        self.model = Some(model);
        self.rebind(rate)
    }

    /// Build (or rebuild) the recognizer for `rate` from the retained model.
    ///
    /// No-op when the live recognizer already runs at `rate`.
    pub fn rebind(&mut self, rate: u32) -> bool {
        if rate == 0 {
            info!("rate not set yet: no recognizer created");
            return false;
        }
        if self.recognizer.is_some() && self.rate == rate {
            return true;
        }
        let Some(model) = self.model.as_ref() else {
            debug!("no model retained, cannot build recognizer");
            return false;
        };

        info!(rate, "creating recognizer");
        match model.create_recognizer(rate as f32) {
            Ok(mut recognizer) => {
                recognizer.set_max_alternatives(self.alternatives);
                self.recognizer = Some(recognizer);
                self.rate = rate;
                self.prev_partial = None;
                true
            }
            Err(e) => {
                error!(rate, error = %e, "could not create recognizer");
                self.recognizer = None;
                self.rate = 0;
                false
            }
        }
    }

    pub fn has_recognizer(&self) -> bool {
        self.recognizer.is_some()
    }

    /// A model has been committed (the recognizer may still be pending a rate).
    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn alternatives(&self) -> u16 {
        self.alternatives
    }

    pub fn number_format(&self) -> NumberFormat {
        self.number_format
    }

    /// Clamp to 0–100 and apply to the live recognizer if there is one.
    pub fn set_alternatives(&mut self, alternatives: u16) {
        self.alternatives = alternatives.min(MAX_ALTERNATIVES);
        match self.recognizer.as_mut() {
            Some(recognizer) => recognizer.set_max_alternatives(self.alternatives),
            None => debug!("no recognizer to set alternatives on"),
        }
    }

    /// Feed samples to the recognizer.
    ///
    /// # Errors
    /// `Recognizer` if there is no recognizer or the engine rejects the data.
    pub fn accept(&mut self, samples: &[i16]) -> Result<AcceptStatus> {
        let recognizer = self
            .recognizer
            .as_mut()
            .ok_or_else(|| FilterError::Recognizer("no recognizer available".into()))?;
        recognizer.accept_waveform(samples)
    }

    /// Full result for the current utterance.
    pub fn result(&mut self) -> Option<String> {
        let format = self.number_format;
        let recognizer = self.recognizer.as_mut()?;
        let text = recognizer
            .result()
            .filter(|json| !is_empty_payload(Extraction::Result, json))
            .map(|json| format.render(json));
        self.prev_partial = None;
        text
    }

    /// Flush the decoder and return what is left.
    pub fn final_result(&mut self) -> Option<String> {
        let format = self.number_format;
        let Some(recognizer) = self.recognizer.as_mut() else {
            debug!("no recognizer available");
            return None;
        };
        info!("getting final result");
        let text = recognizer
            .final_result()
            .filter(|json| !is_empty_payload(Extraction::Final, json))
            .map(|json| format.render(json));
        self.prev_partial = None;
        text
    }

    /// Partial hypothesis, or `None` when empty or unchanged since the last
    /// one returned.
    pub fn partial_result(&mut self) -> Option<String> {
        let recognizer = self.recognizer.as_mut()?;
        let json = recognizer
            .partial_result()
            .filter(|json| !is_empty_payload(Extraction::Partial, json))?;
        if self.prev_partial.as_deref() == Some(json) {
            return None;
        }
        let raw = json.to_owned();
        let rendered = self.number_format.render(&raw);
        self.prev_partial = Some(raw);
        Some(rendered)
    }

    /// Reset decoding state, keeping model and recognizer.
    pub fn flush(&mut self) {
        match self.recognizer.as_mut() {
            Some(recognizer) => recognizer.reset(),
            None => debug!("no recognizer to flush"),
        }
        self.prev_partial = None;
        self.eos = false;
    }

    /// Destroy the recognizer and model. Idempotent.
    pub fn reset(&mut self) {
        self.recognizer = None;
        self.model = None;
        self.rate = 0;
        self.prev_partial = None;
        self.last_processed = None;
        self.last_partial = Duration::ZERO;
        self.eos = false;
    }
}
