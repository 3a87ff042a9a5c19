//! RNNoise suppressor via `nnnoiseless` (pure-Rust port).
//!
//! RNNoise works on 480-sample frames (10 ms at 48 kHz) of f32 samples in the
//! i16 numeric range.

use nnnoiseless::DenoiseState;

use super::{NoiseSuppressor, SuppressorFactory};
use crate::error::Result;

pub const RNNOISE_FRAME_SIZE: usize = DenoiseState::FRAME_SIZE;
pub const RNNOISE_SAMPLE_RATE: u32 = 48_000;

pub struct Rnnoise {
    state: Box<DenoiseState<'static>>,
    out: Vec<f32>,
}

impl Rnnoise {
    pub fn new() -> Self {
        Self {
            state: DenoiseState::new(),
            out: vec![0.0; RNNOISE_FRAME_SIZE],
        }
    }
}

impl Default for Rnnoise {
    fn default() -> Self {
        Self::new()
    }
}

impl NoiseSuppressor for Rnnoise {
    fn process_frame(&mut self, frame: &mut [f32]) {
        self.state.process_frame(&mut self.out, frame);
        frame.copy_from_slice(&self.out);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RnnoiseFactory;

impl SuppressorFactory for RnnoiseFactory {
    fn frame_size(&self) -> usize {
        RNNOISE_FRAME_SIZE
    }

    fn required_rate(&self) -> u32 {
        RNNOISE_SAMPLE_RATE
    }

    fn create(&self) -> Result<Box<dyn NoiseSuppressor>> {
        Ok(Box::new(Rnnoise::new()))
    }
}
