#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use murmur_core::denoise::{Denoise, PassthroughDenoise};
use murmur_core::error::Result;
use murmur_core::{
    AudioBuffer, FilterError, FilterSettings, PipelineHost, SinkEvent, SpeechBackend,
    SpeechFilter, SpeechModel, StateChange, StateChangeReturn, StubBackend,
};

pub const RATE: u32 = 16_000;
pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostNotice {
    AsyncStart,
    AsyncDone,
    Abort,
    Error(String),
}

/// Host that records every callback and exposes a settable clock.
pub struct RecordingHost {
    clock: Mutex<Option<Duration>>,
    tx: Sender<HostNotice>,
    rx: Receiver<HostNotice>,
}

impl RecordingHost {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = unbounded();
        Arc::new(Self {
            clock: Mutex::new(None),
            tx,
            rx,
        })
    }

    pub fn set_running_time(&self, running_time: Option<Duration>) {
        *self.clock.lock() = running_time;
    }

    /// Wait for `notice`, returning everything seen up to and including it.
    pub fn wait_for(&self, notice: &HostNotice) -> Vec<HostNotice> {
        let mut seen = Vec::new();
        loop {
            let next = self
                .rx
                .recv_timeout(WAIT)
                .unwrap_or_else(|_| panic!("timed out waiting for {notice:?}, saw {seen:?}"));
            let done = &next == notice;
            seen.push(next);
            if done {
                return seen;
            }
        }
    }

    pub fn drain(&self) -> Vec<HostNotice> {
        self.rx.try_iter().collect()
    }
}

impl PipelineHost for RecordingHost {
    fn running_time(&self) -> Option<Duration> {
        *self.clock.lock()
    }

    fn async_start(&self) {
        self.tx.send(HostNotice::AsyncStart).ok();
    }

    fn async_done(&self) {
        self.tx.send(HostNotice::AsyncDone).ok();
    }

    fn abort_state(&self) {
        self.tx.send(HostNotice::Abort).ok();
    }

    fn post_error(&self, error: &FilterError) {
        self.tx.send(HostNotice::Error(error.to_string())).ok();
    }
}

/// Backend whose loads block until released, reporting start and finish.
pub struct GatedBackend {
    inner: StubBackend,
    release: Receiver<()>,
    started: Sender<PathBuf>,
    finished: Sender<PathBuf>,
}

pub struct Gate {
    pub release: Sender<()>,
    pub started: Receiver<PathBuf>,
    pub finished: Receiver<PathBuf>,
}

impl GatedBackend {
    pub fn new() -> (Arc<Self>, Gate) {
        let (release_tx, release_rx) = unbounded();
        let (started_tx, started_rx) = unbounded();
        let (finished_tx, finished_rx) = unbounded();
        let backend = Arc::new(Self {
            inner: StubBackend::with_utterance_ms(1_000),
            release: release_rx,
            started: started_tx,
            finished: finished_tx,
        });
        let gate = Gate {
            release: release_tx,
            started: started_rx,
            finished: finished_rx,
        };
        (backend, gate)
    }
}

impl SpeechBackend for GatedBackend {
    fn load_model(&self, path: &Path) -> Result<Arc<dyn SpeechModel>> {
        self.started.send(path.to_path_buf()).ok();
        self.release.recv_timeout(WAIT).ok();
        let model = self.inner.load_model(path);
        self.finished.send(path.to_path_buf()).ok();
        model
    }
}

/// Backend that never manages to load anything.
pub struct FailingBackend;

impl SpeechBackend for FailingBackend {
    fn load_model(&self, path: &Path) -> Result<Arc<dyn SpeechModel>> {
        Err(FilterError::ModelLoad {
            path: path.to_path_buf(),
        })
    }
}

/// A directory that exists, usable as a model path for fake backends.
pub fn model_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

pub fn settings() -> FilterSettings {
    FilterSettings {
        speech_model: Some(model_dir()),
        enable_denoise: false,
        use_signals: true,
        ..FilterSettings::default()
    }
}

pub fn filter_with(
    settings: &FilterSettings,
    backend: Arc<dyn SpeechBackend>,
    host: Arc<RecordingHost>,
) -> SpeechFilter {
    let denoise: Arc<dyn Denoise> = Arc::new(PassthroughDenoise);
    SpeechFilter::with_denoiser(settings, backend, host, denoise).expect("filter")
}

/// Collects every payload delivered in signal mode.
pub fn collect_results(filter: &SpeechFilter) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    filter.connect_result(move |json| sink.lock().push(json.to_owned()));
    seen
}

/// Negotiate caps and bring the filter to PLAYING with a loaded model.
pub fn start_playing(filter: &SpeechFilter, host: &RecordingHost) {
    filter.handle_event(SinkEvent::Caps { rate: RATE });
    assert_eq!(
        filter.change_state(StateChange::NullToReady),
        StateChangeReturn::Success
    );
    assert_eq!(
        filter.change_state(StateChange::ReadyToPaused),
        StateChangeReturn::Async
    );
    host.wait_for(&HostNotice::AsyncDone);
    assert_eq!(
        filter.change_state(StateChange::PausedToPlaying),
        StateChangeReturn::Success
    );
}

/// Push `count` 10 ms buffers starting at `start_ms`.
pub fn feed_ms(filter: &SpeechFilter, start_ms: u64, count: u64) {
    for i in 0..count {
        let pts = Duration::from_millis(start_ms + i * 10);
        let samples = vec![100i16; (RATE / 100) as usize];
        let out = filter.chain(AudioBuffer::new(samples, Some(pts)));
        assert_eq!(out.pts, Some(pts));
    }
}
