//! Fixed-size frame accumulator.
//!
//! ## Algorithm
//!
//! ```text
//! chunk (any length, S16) ──► input frame (f32, frame_size)
//!                                 │ full?
//!                                 ▼
//!                             transform(frame)
//!                                 │
//!                                 ▼
//!                     ready FIFO (2 × frame_size) ──► drained back into chunk
//! ```
//!
//! 1. Samples are converted to f32 (i16 numeric range, no scaling) and copied
//!    into the input frame at the current fill position.
//! 2. Each time the frame fills, it is transformed in place and pushed whole
//!    into the ready FIFO. When the FIFO lacks room for a whole frame, the
//!    frame is dropped with a warning.
//! 3. Up to `chunk.len()` ready samples are popped back into the chunk
//!    (clamped to S16); whatever is left of the chunk is zero-filled.
//!
//! The chunk never grows, never carries stale samples, and the output lags
//! the input by at least one frame.

use ringbuf::{
    traits::{Consumer, Observer, Producer},
    HeapRb,
};
use tracing::warn;

/// Number of whole frames the ready FIFO can hold.
pub const FRAMES_BUFFERED: usize = 2;

pub struct FrameAccumulator {
    frame_size: usize,
    /// Partial input frame.
    input: Vec<f32>,
    /// Fill position inside `input`. Always `< frame_size` between calls.
    input_pos: usize,
    /// Transformed samples waiting to be drained.
    ready: HeapRb<f32>,
    /// Scratch space for draining, reused across calls.
    scratch: Vec<f32>,
    dropped_frames: u64,
}

impl FrameAccumulator {
    /// Create an accumulator for `frame_size`-sample frames.
    ///
    /// # Panics
    /// Panics if `frame_size` is zero.
    pub fn new(frame_size: usize) -> Self {
        assert!(frame_size > 0, "frame size must be non-zero");
        Self {
            frame_size,
            input: vec![0.0; frame_size],
            input_pos: 0,
            ready: HeapRb::<f32>::new(frame_size * FRAMES_BUFFERED),
            scratch: Vec::new(),
            dropped_frames: 0,
        }
    }

    /// Feed `chunk` through the accumulator, replacing its contents in place
    /// with drained output.
    ///
    /// `transform` is called once per completed frame. Returns the number of
    /// leading samples of `chunk` that carry drained output; the rest is
    /// silence.
    pub fn process<F>(&mut self, chunk: &mut [i16], mut transform: F) -> usize
    where
        F: FnMut(&mut [f32]),
    {
        let mut read = 0;
        while read < chunk.len() {
            let to_copy = (self.frame_size - self.input_pos).min(chunk.len() - read);
            let dst = &mut self.input[self.input_pos..self.input_pos + to_copy];
            for (d, s) in dst.iter_mut().zip(&chunk[read..read + to_copy]) {
                *d = f32::from(*s);
            }
            read += to_copy;
            self.input_pos += to_copy;

            if self.input_pos == self.frame_size {
                transform(self.input.as_mut_slice());
                if self.ready.vacant_len() >= self.frame_size {
                    self.ready.push_slice(&self.input);
                } else {
                    self.dropped_frames += 1;
                    warn!(
                        frame_size = self.frame_size,
                        dropped_frames = self.dropped_frames,
                        "denoise output buffer is full, dropping a processed frame"
                    );
                }
                self.input_pos = 0;
            }
        }

        let to_write = self.ready.occupied_len().min(chunk.len());
        self.scratch.resize(to_write, 0.0);
        let popped = self.ready.pop_slice(&mut self.scratch[..to_write]);
        for (d, s) in chunk[..popped].iter_mut().zip(&self.scratch[..popped]) {
            *d = s.clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16;
        }
        chunk[popped..].fill(0);
        popped
    }

    /// Discard all buffered input and output.
    pub fn reset(&mut self) {
        self.input.fill(0.0);
        self.input_pos = 0;
        self.ready.clear();
    }

    /// Samples waiting for the current input frame to fill.
    pub fn pending_input(&self) -> usize {
        self.input_pos
    }

    /// Transformed samples not yet drained.
    pub fn ready_len(&self) -> usize {
        self.ready.occupied_len()
    }

    /// Frames lost to a full ready FIFO since creation.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }
}
