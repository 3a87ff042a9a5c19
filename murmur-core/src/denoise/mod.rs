//! Optional noise reduction ahead of recognition.
//!
//! The `Denoise` trait is what the buffer engine talks to. Two
//! implementations exist:
//!
//! - [`DenoiseStage`]: frame-accumulating wrapper around a black-box
//!   [`NoiseSuppressor`], built from a [`SuppressorFactory`].
//! - [`PassthroughDenoise`]: stand-in used when no suppressor is compiled in.
//!
//! Initialisation is deferred until the stream rate is known. Denoising is a
//! strict rate gate, not a resampler: when the live rate differs from the
//! suppressor's required rate the samples are left untouched.
//!
//! All mutable state sits behind its own `parking_lot::Mutex`, separate from
//! the recognizer session lock. The data path takes it while already holding
//! the session lock; property changes take it alone.

#[cfg(feature = "rnnoise")]
pub mod rnnoise;

#[cfg(feature = "rnnoise")]
pub use rnnoise::RnnoiseFactory;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::buffering::FrameAccumulator;
use crate::error::Result;

/// Black-box frame transform (e.g. RNNoise).
pub trait NoiseSuppressor: Send + 'static {
    /// Denoise one frame in place. Samples are in the i16 numeric range and
    /// `frame.len()` equals the factory's `frame_size()`.
    fn process_frame(&mut self, frame: &mut [f32]);
}

/// Builds suppressor instances and describes their fixed requirements.
pub trait SuppressorFactory: Send + Sync + 'static {
    fn frame_size(&self) -> usize;
    /// The only stream rate the suppressor accepts.
    fn required_rate(&self) -> u32;
    /// # Errors
    /// Returns an error if the engine cannot be constructed.
    fn create(&self) -> Result<Box<dyn NoiseSuppressor>>;
}

/// Interface seen by the filter for the optional denoising step.
pub trait Denoise: Send + Sync + 'static {
    /// Whether a real suppressor is compiled in.
    fn is_available(&self) -> bool;
    fn is_enabled(&self) -> bool;
    /// Toggle denoising. Always forces re-initialisation.
    fn set_enabled(&self, enabled: bool);
    /// Initialise for `rate` if enabled and not yet initialised.
    ///
    /// Returns `false` when initialisation had to be deferred or failed.
    fn maybe_init(&self, rate: u32) -> bool;
    fn is_initialized(&self) -> bool;
    /// Denoise `samples` in place. No-op unless initialised and `rate`
    /// matches the suppressor's required rate.
    fn apply(&self, samples: &mut [i16], rate: u32);
    /// Drop buffered audio and require re-initialisation.
    fn reset(&self);
}

/// Denoiser matching the features this crate was built with.
pub fn default_denoiser() -> Arc<dyn Denoise> {
    #[cfg(feature = "rnnoise")]
    let denoise: Arc<dyn Denoise> = Arc::new(DenoiseStage::new(RnnoiseFactory));

    #[cfg(not(feature = "rnnoise"))]
    let denoise: Arc<dyn Denoise> = Arc::new(PassthroughDenoise);

    denoise
}

#[derive(Default)]
struct DenoiseContext {
    suppressor: Option<Box<dyn NoiseSuppressor>>,
    accumulator: Option<FrameAccumulator>,
    initialized: bool,
}

pub struct DenoiseStage {
    factory: Box<dyn SuppressorFactory>,
    enabled: AtomicBool,
    ctx: Mutex<DenoiseContext>,
}

impl DenoiseStage {
    /// Create a stage, enabled by default.
    pub fn new<F: SuppressorFactory>(factory: F) -> Self {
        Self {
            factory: Box::new(factory),
            enabled: AtomicBool::new(true),
            ctx: Mutex::new(DenoiseContext::default()),
        }
    }

    /// Frames lost to output overflow since the last initialisation.
    pub fn dropped_frames(&self) -> u64 {
        self.ctx
            .lock()
            .accumulator
            .as_ref()
            .map(FrameAccumulator::dropped_frames)
            .unwrap_or(0)
    }
}

impl Denoise for DenoiseStage {
    fn is_available(&self) -> bool {
        true
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        self.ctx.lock().initialized = false;
        info!(enabled, "denoise toggled");
    }

    fn maybe_init(&self, rate: u32) -> bool {
        if !self.is_enabled() {
            return true;
        }
        if rate == 0 {
            debug!("sample rate not available, deferring denoise initialisation");
            return false;
        }

        let mut ctx = self.ctx.lock();
        if ctx.initialized {
            return true;
        }

        ctx.suppressor = None;
        ctx.accumulator = None;

        match self.factory.create() {
            Ok(suppressor) => ctx.suppressor = Some(suppressor),
            Err(e) => {
                warn!(error = %e, "failed to create noise suppressor, disabling denoise");
                self.enabled.store(false, Ordering::SeqCst);
                return false;
            }
        }
        ctx.accumulator = Some(FrameAccumulator::new(self.factory.frame_size()));
        ctx.initialized = true;

        if rate != self.factory.required_rate() {
            info!(
                rate,
                required = self.factory.required_rate(),
                "denoise initialised but stream rate differs, denoising will be skipped"
            );
        } else {
            info!(rate, "denoise initialised");
        }
        true
    }

    fn is_initialized(&self) -> bool {
        self.ctx.lock().initialized
    }

    fn apply(&self, samples: &mut [i16], rate: u32) {
        if !self.is_enabled() {
            return;
        }

        let mut guard = self.ctx.lock();
        let ctx = &mut *guard;
        if !ctx.initialized || rate != self.factory.required_rate() {
            return;
        }

        if let (Some(suppressor), Some(accumulator)) =
            (ctx.suppressor.as_mut(), ctx.accumulator.as_mut())
        {
            accumulator.process(samples, |frame| suppressor.process_frame(frame));
        }
    }

    fn reset(&self) {
        let mut ctx = self.ctx.lock();
        if let Some(acc) = ctx.accumulator.as_mut() {
            acc.reset();
        }
        ctx.initialized = false;
        debug!("denoise reset");
    }
}

/// No-op stand-in used when no suppressor is compiled in.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughDenoise;

impl Denoise for PassthroughDenoise {
    fn is_available(&self) -> bool {
        false
    }

    fn is_enabled(&self) -> bool {
        false
    }

    fn set_enabled(&self, enabled: bool) {
        if enabled {
            warn!("noise suppression is not compiled in, ignoring enable request");
        }
    }

    fn maybe_init(&self, _rate: u32) -> bool {
        true
    }

    fn is_initialized(&self) -> bool {
        false
    }

    fn apply(&self, _samples: &mut [i16], _rate: u32) {}

    fn reset(&self) {}
}
