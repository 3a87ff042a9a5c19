//! Event types emitted by the filter.
//!
//! ## Delivery
//!
//! | Event | Route |
//! |-------|-------|
//! | `RecognitionEvent` | `ResultSink` chosen by the `use-signals` property |
//! | `ResultMessage` | bus message named [`MESSAGE_STRUCTURE`] (message mode) |
//! | `PhaseEvent` | `SpeechFilter::subscribe_phase` |

use serde::{Deserialize, Serialize};

/// Name of the structure carried by bus messages.
pub const MESSAGE_STRUCTURE: &str = "murmur";
/// Name of the single string field in a bus message.
pub const MESSAGE_FIELD: &str = "current-result";

// ---------------------------------------------------------------------------
// Recognition results
// ---------------------------------------------------------------------------

/// Which extraction produced a result payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    /// In-progress hypothesis; may be superseded.
    Partial,
    /// Utterance boundary reached during streaming.
    Result,
    /// Decoder flushed at end of stream.
    Final,
}

/// One result payload, as handed to a `ResultSink`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    pub kind: ResultKind,
    /// Engine JSON, owned copy.
    pub json: String,
}

/// Application message posted on the bus in message mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMessage {
    pub structure: String,
    #[serde(rename = "current-result")]
    pub current_result: String,
}

impl ResultMessage {
    pub fn new(current_result: impl Into<String>) -> Self {
        Self {
            structure: MESSAGE_STRUCTURE.to_string(),
            current_result: current_result.into(),
        }
    }
}

impl From<&RecognitionEvent> for ResultMessage {
    fn from(event: &RecognitionEvent) -> Self {
        Self::new(event.json.clone())
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Where the filter is in the model lifecycle.
///
/// `Idle` → `Loading` → `Ready` → `Idle` on teardown; a failed or cancelled
/// load goes straight back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecyclePhase {
    /// No model loaded.
    #[default]
    Idle,
    /// Model construction in flight on the loader thread.
    Loading,
    /// Model committed; recognition runs once the rate is known.
    Ready,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseEvent {
    pub phase: LifecyclePhase,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}
