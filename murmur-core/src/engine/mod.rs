//! `SpeechFilter`: lifecycle controller and property surface.
//!
//! ## Lifecycle
//!
//! ```text
//! SpeechFilter::new()
//!     └─► change_state(ReadyToPaused)  → path validated, load queued, Async
//!             └─► loader thread        → model committed, host.async_done()
//!                 └─► chain(buffer)... → results through the emitter
//!                     └─► Eos          → final result emitted once
//!     └─► change_state(PausedToReady)  → load cancelled, session torn down
//! ```
//!
//! ## Locking
//!
//! Three locks, always taken in this order:
//!
//! 1. `stream_lock`: serialises the data path against end-of-stream, caps,
//!    flush and teardown.
//! 2. `session`: recognizer, model, load token, timestamps.
//! 3. the denoise context lock inside [`Denoise`].
//!
//! The loader thread takes only `session` (and then denoise) and never holds
//! anything while the model is being constructed.

pub mod host;
pub mod loader;
pub mod processing;
pub mod session;

pub use host::PipelineHost;
pub use loader::{CancellationToken, PendingLoad};
pub use processing::{BufferOutcome, CATCH_UP_LAG, CATCH_UP_MIN_RECHECK};

use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicI64, AtomicU32, AtomicUsize, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{
    buffering::AudioBuffer,
    config::FilterSettings,
    denoise::{default_denoiser, Denoise},
    error::{FilterError, Result},
    inference::{json::NumberFormat, SpeechBackend},
    ipc::{
        events::{LifecyclePhase, PhaseEvent, ResultKind, ResultMessage},
        sink::{ResultEmitter, ResultHandler},
    },
};

use self::loader::ModelLoader;
use self::processing::BufferContext;
use self::session::Session;

/// Broadcast channel capacity for lifecycle phase events.
const PHASE_CAP: usize = 32;

/// Host pipeline state of the element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ElementState {
    #[default]
    Null,
    Ready,
    Paused,
    Playing,
}

impl ElementState {
    /// Configuration properties may only change in these states.
    pub fn is_inactive(self) -> bool {
        matches!(self, ElementState::Null | ElementState::Ready)
    }
}

/// A state transition requested by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    NullToReady,
    ReadyToPaused,
    PausedToPlaying,
    PlayingToPaused,
    PausedToReady,
    ReadyToNull,
    ReadyToReady,
    PausedToPaused,
}

impl StateChange {
    pub fn target(self) -> ElementState {
        match self {
            StateChange::NullToReady
            | StateChange::PausedToReady
            | StateChange::ReadyToReady => ElementState::Ready,
            StateChange::ReadyToPaused
            | StateChange::PlayingToPaused
            | StateChange::PausedToPaused => ElementState::Paused,
            StateChange::PausedToPlaying => ElementState::Playing,
            StateChange::ReadyToNull => ElementState::Null,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChangeReturn {
    Success,
    /// Completion is reported later through [`PipelineHost::async_done`] or
    /// [`PipelineHost::abort_state`].
    Async,
    Failure,
}

/// Stream events arriving on the sink side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkEvent {
    /// Negotiated format; only the sample rate matters here.
    Caps { rate: u32 },
    FlushStart,
    FlushStop,
    Eos,
}

/// Per-outcome buffer counters.
#[derive(Debug, Default)]
pub struct FilterDiagnostics {
    pub buffers: AtomicUsize,
    pub preroll: AtomicUsize,
    pub dropped: AtomicUsize,
    pub rejected: AtomicUsize,
    pub throttled: AtomicUsize,
    pub polled: AtomicUsize,
}

impl FilterDiagnostics {
    fn record(&self, outcome: BufferOutcome) {
        self.buffers.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            BufferOutcome::Preroll => &self.preroll,
            BufferOutcome::Dropped => &self.dropped,
            BufferOutcome::Rejected => &self.rejected,
            BufferOutcome::Throttled => &self.throttled,
            BufferOutcome::Polled => &self.polled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            buffers: self.buffers.load(Ordering::Relaxed),
            preroll: self.preroll.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            polled: self.polled.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub buffers: usize,
    pub preroll: usize,
    pub dropped: usize,
    pub rejected: usize,
    pub throttled: usize,
    pub polled: usize,
}

/// State shared between the filter handle and the loader thread.
pub(crate) struct Shared {
    pub(crate) backend: Arc<dyn SpeechBackend>,
    pub(crate) host: Arc<dyn PipelineHost>,
    pub(crate) denoise: Arc<dyn Denoise>,
    pub(crate) session: Mutex<Session>,
    emitter: ResultEmitter,
    stream_lock: Mutex<()>,
    state: Mutex<ElementState>,
    /// Target of an `Async` transition still waiting for the loader.
    pending_state: Mutex<Option<ElementState>>,
    model_path: Mutex<Option<PathBuf>>,
    rate: AtomicU32,
    partial_interval_ms: AtomicI64,
    phase: Mutex<LifecyclePhase>,
    phase_tx: broadcast::Sender<PhaseEvent>,
    diagnostics: FilterDiagnostics,
}

impl Shared {
    pub(crate) fn sample_rate(&self) -> u32 {
        self.rate.load(Ordering::SeqCst)
    }

    pub(crate) fn set_phase(&self, phase: LifecyclePhase, detail: Option<String>) {
        let mut current = self.phase.lock();
        if *current == phase && detail.is_none() {
            return;
        }
        *current = phase;
        let _ = self.phase_tx.send(PhaseEvent { phase, detail });
    }

    /// Commit the target state of a pending `Async` transition.
    pub(crate) fn complete_async_transition(&self) {
        if let Some(target) = self.pending_state.lock().take() {
            *self.state.lock() = target;
        }
    }

    /// Cancel the in-flight load, if any.
    fn cancel_model_loading(&self) {
        let mut session = self.session.lock();
        self.cancel_locked(&mut session);
    }

    /// Cancel the live load token. The pending `Async` transition will never
    /// be committed, so it is dropped and the phase falls back to `Idle`.
    fn cancel_locked(&self, session: &mut Session) {
        let Some(token) = session.token.take() else {
            return;
        };
        if token.cancel() {
            info!("cancelling model creation");
            self.pending_state.lock().take();
            self.set_phase(LifecyclePhase::Idle, None);
        }
    }

    /// Move to `target` and drop the model. Cancelling the load, dropping the
    /// pending transition and writing the state happen under the session
    /// lock, so a loader commit lands either entirely before or not at all.
    fn teardown(&self, target: ElementState) {
        {
            let mut session = self.session.lock();
            self.cancel_locked(&mut session);
            self.pending_state.lock().take();
            *self.state.lock() = target;
        }

        let _stream = self.stream_lock.lock();
        let mut session = self.session.lock();
        session.reset();
        self.denoise.reset();
        drop(session);

        self.set_phase(LifecyclePhase::Idle, None);
    }
}

/// Streaming speech-recognition filter.
///
/// `SpeechFilter` is `Send + Sync`; all state uses interior mutability.
/// Buffers pass through [`SpeechFilter::chain`] unchanged except for
/// in-place denoising.
pub struct SpeechFilter {
    shared: Arc<Shared>,
    loader: ModelLoader,
}

impl SpeechFilter {
    /// Create a filter using the denoiser this crate was built with.
    ///
    /// # Errors
    /// `Io` if the loader thread cannot be spawned.
    pub fn new(
        settings: &FilterSettings,
        backend: Arc<dyn SpeechBackend>,
        host: Arc<dyn PipelineHost>,
    ) -> Result<Self> {
        Self::with_denoiser(settings, backend, host, default_denoiser())
    }

    /// # Errors
    /// `Io` if the loader thread cannot be spawned.
    pub fn with_denoiser(
        settings: &FilterSettings,
        backend: Arc<dyn SpeechBackend>,
        host: Arc<dyn PipelineHost>,
        denoise: Arc<dyn Denoise>,
    ) -> Result<Self> {
        let mut settings = settings.clone();
        settings.normalize();

        if denoise.is_enabled() != settings.enable_denoise {
            denoise.set_enabled(settings.enable_denoise);
        }

        let (phase_tx, _) = broadcast::channel(PHASE_CAP);
        let shared = Arc::new(Shared {
            backend,
            host,
            denoise,
            session: Mutex::new(Session::new(
                settings.alternatives,
                settings.number_format(),
            )),
            emitter: ResultEmitter::new(settings.use_signals),
            stream_lock: Mutex::new(()),
            state: Mutex::new(ElementState::Null),
            pending_state: Mutex::new(None),
            model_path: Mutex::new(settings.speech_model.clone()),
            rate: AtomicU32::new(0),
            partial_interval_ms: AtomicI64::new(settings.partial_results_interval),
            phase: Mutex::new(LifecyclePhase::Idle),
            phase_tx,
            diagnostics: FilterDiagnostics::default(),
        });

        let worker = Arc::clone(&shared);
        let loader = ModelLoader::spawn(move |load| loader::execute(&worker, load))?;

        Ok(Self { shared, loader })
    }

    // ── State machine ────────────────────────────────────────────────────────

    pub fn change_state(&self, transition: StateChange) -> StateChangeReturn {
        debug!(?transition, "state change");
        match transition {
            StateChange::PausedToReady | StateChange::ReadyToReady => {
                self.shared.teardown(transition.target());
                StateChangeReturn::Success
            }
            StateChange::ReadyToPaused | StateChange::PausedToPaused => {
                if transition == StateChange::ReadyToPaused {
                    self.shared.session.lock().eos = false;
                }
                let ret = self.ensure_model_loaded(transition.target());
                if ret == StateChangeReturn::Success {
                    *self.shared.state.lock() = transition.target();
                }
                ret
            }
            _ => {
                *self.shared.state.lock() = transition.target();
                StateChangeReturn::Success
            }
        }
    }

    fn ensure_model_loaded(&self, target: ElementState) -> StateChangeReturn {
        let path = match self.validated_model_path() {
            Ok(path) => path,
            Err(e) => {
                error!(error = %e, "cannot load speech model");
                self.shared.host.post_error(&e);
                return StateChangeReturn::Failure;
            }
        };

        let token = {
            let mut session = self.shared.session.lock();
            session.last_processed = None;
            if session.has_model() {
                debug!("model already loaded");
                return StateChangeReturn::Success;
            }
            if let Some(previous) = session.token.take() {
                previous.cancel();
            }
            let token = CancellationToken::new();
            session.token = Some(token.clone());
            *self.shared.pending_state.lock() = Some(target);
            token
        };

        info!(path = %path.display(), "loading speech model");
        self.shared.set_phase(LifecyclePhase::Loading, None);
        self.shared.host.async_start();
        self.loader.submit(PendingLoad { path, token });
        StateChangeReturn::Async
    }

    fn validated_model_path(&self) -> Result<PathBuf> {
        let path = self
            .shared
            .model_path
            .lock()
            .clone()
            .ok_or(FilterError::ModelPathUnset)?;
        if !path.exists() {
            return Err(FilterError::ModelNotFound { path });
        }
        Ok(path)
    }

    pub fn state(&self) -> ElementState {
        *self.shared.state.lock()
    }

    // ── Data path ────────────────────────────────────────────────────────────

    /// Process one buffer and hand it back for forwarding downstream.
    pub fn chain(&self, mut buffer: AudioBuffer) -> AudioBuffer {
        let _stream = self.shared.stream_lock.lock();
        let ctx = BufferContext {
            denoise: self.shared.denoise.as_ref(),
            emitter: &self.shared.emitter,
            rate: self.shared.sample_rate(),
            running_time: self.shared.host.running_time(),
            partial_interval_ms: self.shared.partial_interval_ms.load(Ordering::Relaxed),
        };
        let mut session = self.shared.session.lock();
        let outcome = processing::process_buffer(&mut session, &ctx, &mut buffer);
        drop(session);
        self.shared.diagnostics.record(outcome);
        buffer
    }

    /// Handle a sink-side event. Always returns `true`: events are forwarded.
    pub fn handle_event(&self, event: SinkEvent) -> bool {
        match event {
            SinkEvent::Caps { rate } => self.on_caps(rate),
            SinkEvent::FlushStart => {
                debug!("flush start, resetting recognizer");
                let _stream = self.shared.stream_lock.lock();
                self.shared.session.lock().flush();
            }
            SinkEvent::FlushStop => debug!("flush stop"),
            SinkEvent::Eos => self.on_eos(),
        }
        true
    }

    fn on_caps(&self, rate: u32) {
        let _stream = self.shared.stream_lock.lock();
        let previous = self.shared.rate.swap(rate, Ordering::SeqCst);
        if previous == rate {
            return;
        }
        info!(rate, previous, "sample rate negotiated");

        let mut session = self.shared.session.lock();
        if previous != 0 {
            self.shared.denoise.reset();
        }
        if session.has_model() && session.rebind(rate) {
            self.shared.denoise.maybe_init(rate);
        }
    }

    fn on_eos(&self) {
        info!("end of stream");
        self.shared.cancel_model_loading();

        let _stream = self.shared.stream_lock.lock();
        let mut session = self.shared.session.lock();
        if session.eos {
            debug!("already at end of stream");
            return;
        }
        session.eos = true;
        if let Some(json) = session.final_result() {
            self.shared.emitter.emit(ResultKind::Final, json);
        }
    }

    // ── Properties ───────────────────────────────────────────────────────────

    fn ensure_mutable(&self, property: &'static str) -> Result<()> {
        let state = self.state();
        if state.is_inactive() {
            Ok(())
        } else {
            info!(
                property,
                ?state,
                "property can only be changed in NULL or READY state"
            );
            Err(FilterError::PropertyNotMutable { property, state })
        }
    }

    /// # Errors
    /// `PropertyNotMutable` outside NULL/READY.
    pub fn set_speech_model(&self, path: Option<&Path>) -> Result<()> {
        self.ensure_mutable("speech-model")?;
        let mut current = self.shared.model_path.lock();
        if current.as_deref() == path {
            return Ok(());
        }
        info!(path = ?path, "new path for model");
        *current = path.map(Path::to_path_buf);
        Ok(())
    }

    pub fn speech_model(&self) -> Option<PathBuf> {
        self.shared.model_path.lock().clone()
    }

    /// Toggling always forces denoise re-initialisation.
    ///
    /// # Errors
    /// `PropertyNotMutable` outside NULL/READY.
    pub fn set_enable_denoise(&self, enabled: bool) -> Result<()> {
        self.ensure_mutable("enable-denoise")?;
        if enabled && !self.shared.denoise.is_available() {
            warn!("no noise suppressor compiled in, enable-denoise has no effect");
        }
        self.shared.denoise.set_enabled(enabled);
        Ok(())
    }

    pub fn enable_denoise(&self) -> bool {
        self.shared.denoise.is_enabled()
    }

    /// Clamped to 0–100; applied to the live recognizer if there is one.
    pub fn set_alternatives(&self, alternatives: u16) {
        let mut session = self.shared.session.lock();
        if session.alternatives() == alternatives {
            return;
        }
        session.set_alternatives(alternatives);
    }

    pub fn alternatives(&self) -> u16 {
        self.shared.session.lock().alternatives()
    }

    /// Minimum ms between partial results; values below -1 become -1 and -1
    /// disables partial results.
    pub fn set_partial_results_interval(&self, interval_ms: i64) {
        self.shared
            .partial_interval_ms
            .store(interval_ms.max(-1), Ordering::Relaxed);
    }

    pub fn partial_results_interval(&self) -> i64 {
        self.shared.partial_interval_ms.load(Ordering::Relaxed)
    }

    pub fn set_use_signals(&self, use_signals: bool) {
        self.shared.emitter.set_use_signals(use_signals);
    }

    pub fn use_signals(&self) -> bool {
        self.shared.emitter.use_signals()
    }

    /// Force the recognizer to flush and return its final result.
    pub fn current_final_results(&self) -> Option<String> {
        self.shared.session.lock().final_result()
    }

    /// Current full result without flushing.
    pub fn current_results(&self) -> Option<String> {
        self.shared.session.lock().result()
    }

    /// Apply every setting through the regular property setters.
    ///
    /// # Errors
    /// `PropertyNotMutable` if a restricted setting changes outside
    /// NULL/READY. Unrestricted settings are applied regardless.
    pub fn apply_settings(&self, settings: &FilterSettings) -> Result<()> {
        let mut settings = settings.clone();
        settings.normalize();

        self.set_alternatives(settings.alternatives);
        self.set_partial_results_interval(settings.partial_results_interval);
        self.set_use_signals(settings.use_signals);

        if self.speech_model() != settings.speech_model {
            self.set_speech_model(settings.speech_model.as_deref())?;
        }
        if self.enable_denoise() != settings.enable_denoise {
            self.set_enable_denoise(settings.enable_denoise)?;
        }
        Ok(())
    }

    /// Snapshot of the current property values.
    pub fn settings(&self) -> FilterSettings {
        let result_decimals = match self.shared.session.lock().number_format() {
            NumberFormat::FixedDecimals(decimals) => Some(decimals),
            NumberFormat::Verbatim => None,
        };
        FilterSettings {
            speech_model: self.speech_model(),
            enable_denoise: self.enable_denoise(),
            alternatives: self.alternatives(),
            partial_results_interval: self.partial_results_interval(),
            use_signals: self.use_signals(),
            result_decimals,
        }
    }

    // ── Observation ──────────────────────────────────────────────────────────

    /// Register a callback for signal mode.
    pub fn connect_result<F>(&self, handler: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let handler: ResultHandler = Arc::new(handler);
        self.shared.emitter.connect(handler);
    }

    /// Subscribe to bus messages posted in message mode.
    pub fn subscribe_messages(&self) -> broadcast::Receiver<ResultMessage> {
        self.shared.emitter.subscribe()
    }

    pub fn phase(&self) -> LifecyclePhase {
        *self.shared.phase.lock()
    }

    pub fn subscribe_phase(&self) -> broadcast::Receiver<PhaseEvent> {
        self.shared.phase_tx.subscribe()
    }

    /// Negotiated sample rate, 0 until caps arrive.
    pub fn sample_rate(&self) -> u32 {
        self.shared.sample_rate()
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.shared.diagnostics.snapshot()
    }
}

impl Drop for SpeechFilter {
    fn drop(&mut self) {
        self.shared.cancel_model_loading();
    }
}
