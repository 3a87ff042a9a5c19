//! Audio buffer types and the fixed-frame accumulator used by the denoiser.
//!
//! The accumulator's output side is a `ringbuf::HeapRb<f32>` sized to two
//! frames: completed frames are pushed whole, drained samples are popped in
//! FIFO order.

pub mod buffer;
pub mod frame;

pub use buffer::AudioBuffer;
pub use frame::FrameAccumulator;
