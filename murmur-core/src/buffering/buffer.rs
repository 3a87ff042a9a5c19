//! Typed audio buffer handed to the filter by the host pipeline.

use std::time::Duration;

/// A contiguous block of mono S16 PCM samples with its presentation timestamp.
///
/// The filter processes the samples in place (denoising) and hands the same
/// buffer back for forwarding downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBuffer {
    /// Mono signed 16-bit samples.
    pub samples: Vec<i16>,
    /// Presentation timestamp in pipeline running time, if the source set one.
    pub pts: Option<Duration>,
}

impl AudioBuffer {
    pub fn new(samples: Vec<i16>, pts: Option<Duration>) -> Self {
        Self { samples, pts }
    }

    /// Duration of this buffer at `sample_rate` Hz.
    pub fn duration(&self, sample_rate: u32) -> Duration {
        if sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / sample_rate as f64)
    }

    /// Size of the sample payload in bytes, as the engine sees it.
    pub fn byte_len(&self) -> usize {
        self.samples.len() * std::mem::size_of::<i16>()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
