//! `murmur`: run the recognition filter over a WAV file.
//!
//! Reads the file, feeds it through `SpeechFilter` in 10 ms buffers with a
//! simulated pipeline clock and prints every result payload on stdout.
//! Built without the `vosk` feature it uses the stub backend, which reports
//! audio timing instead of text.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use parking_lot::{Condvar, Mutex};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{info, warn};

use murmur_core::{
    read_settings, AudioBuffer, FilterError, FilterSettings, PipelineHost, ResultMessage,
    SinkEvent, SpeechBackend, SpeechFilter, StateChange, StateChangeReturn,
};

const BUFFER_MS: u64 = 10;
const LOAD_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug)]
struct Args {
    model: Option<PathBuf>,
    input: PathBuf,
    settings: Option<PathBuf>,
    lag_ms: u64,
    signals: bool,
}

fn parse_args() -> Result<Args> {
    let mut model = None;
    let mut input = None;
    let mut settings = None;
    let mut lag_ms = 0;
    let mut signals = false;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--model" => {
                let Some(v) = it.next() else {
                    bail!("missing value for --model");
                };
                model = Some(PathBuf::from(v));
            }
            "--input" => {
                let Some(v) = it.next() else {
                    bail!("missing value for --input");
                };
                input = Some(PathBuf::from(v));
            }
            "--settings" => {
                let Some(v) = it.next() else {
                    bail!("missing value for --settings");
                };
                settings = Some(PathBuf::from(v));
            }
            "--lag-ms" => {
                let Some(v) = it.next() else {
                    bail!("missing value for --lag-ms");
                };
                lag_ms = v
                    .parse::<u64>()
                    .with_context(|| format!("invalid value for --lag-ms: {v}"))?;
            }
            "--signals" => signals = true,
            "--help" | "-h" => {
                println!(
                    "Usage: murmur --model <dir> --input <file.wav> \\
  [--settings <file.json>] [--lag-ms <n>] [--signals]"
                );
                std::process::exit(0);
            }
            other => bail!("unknown argument: {other}"),
        }
    }

    let Some(input) = input else {
        bail!("--input is required");
    };
    Ok(Args {
        model,
        input,
        settings,
        lag_ms,
        signals,
    })
}

#[derive(Debug, Clone, PartialEq)]
enum LoadStatus {
    Idle,
    Pending,
    Done,
    Failed(String),
}

/// Pipeline stand-in: a clock driven by the feeder and a load-completion
/// latch.
struct CliHost {
    clock: Mutex<Option<Duration>>,
    status: Mutex<LoadStatus>,
    changed: Condvar,
}

impl CliHost {
    fn new() -> Self {
        Self {
            clock: Mutex::new(None),
            status: Mutex::new(LoadStatus::Idle),
            changed: Condvar::new(),
        }
    }

    fn set_clock(&self, running_time: Duration) {
        *self.clock.lock() = Some(running_time);
    }

    fn set_status(&self, status: LoadStatus) {
        let mut current = self.status.lock();
        // Keep the first failure reason.
        if matches!(*current, LoadStatus::Failed(_)) && status != LoadStatus::Pending {
            return;
        }
        *current = status;
        self.changed.notify_all();
    }

    fn wait_loaded(&self) -> Result<()> {
        let mut status = self.status.lock();
        while *status == LoadStatus::Pending {
            if self.changed.wait_for(&mut status, LOAD_TIMEOUT).timed_out() {
                bail!("timed out waiting for the speech model");
            }
        }
        match &*status {
            LoadStatus::Failed(reason) => bail!("model loading failed: {reason}"),
            _ => Ok(()),
        }
    }
}

impl PipelineHost for CliHost {
    fn running_time(&self) -> Option<Duration> {
        *self.clock.lock()
    }

    fn async_start(&self) {
        self.set_status(LoadStatus::Pending);
    }

    fn async_done(&self) {
        self.set_status(LoadStatus::Done);
    }

    fn abort_state(&self) {
        self.set_status(LoadStatus::Failed("state change aborted".into()));
    }

    fn post_error(&self, error: &FilterError) {
        if error.is_resource_not_found() {
            warn!(error = %error, "speech model unavailable, check --model");
        } else {
            warn!(error = %error, "filter error");
        }
        self.set_status(LoadStatus::Failed(error.to_string()));
    }
}

/// Mono S16 samples and rate from a WAV file. Channels are averaged.
fn read_wav(path: &Path) -> Result<(Vec<i16>, u32)> {
    let mut reader =
        hound::WavReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(|v| v * f32::from(i16::MAX)))
            .collect::<std::result::Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let shift = i32::from(spec.bits_per_sample) - 16;
            reader
                .samples::<i32>()
                .map(|s| {
                    s.map(|v| {
                        if shift >= 0 {
                            (v >> shift) as f32
                        } else {
                            (v << -shift) as f32
                        }
                    })
                })
                .collect::<std::result::Result<_, _>>()?
        }
    };

    let mono = interleaved
        .chunks(channels)
        .map(|frame| {
            let avg = frame.iter().sum::<f32>() / frame.len() as f32;
            avg.clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
        })
        .collect();
    Ok((mono, spec.sample_rate))
}

fn print_messages(rx: &mut broadcast::Receiver<ResultMessage>) {
    loop {
        match rx.try_recv() {
            Ok(msg) => println!("{}", msg.current_result),
            Err(TryRecvError::Lagged(missed)) => warn!(missed, "result messages dropped"),
            Err(_) => break,
        }
    }
}

fn backend() -> Arc<dyn SpeechBackend> {
    #[cfg(feature = "vosk")]
    let backend: Arc<dyn SpeechBackend> = Arc::new(murmur_core::VoskBackend::new(false));

    #[cfg(not(feature = "vosk"))]
    let backend: Arc<dyn SpeechBackend> = Arc::new(murmur_core::StubBackend::new());

    backend
}

fn run(args: Args) -> Result<()> {
    let mut settings = match &args.settings {
        Some(path) => read_settings(path)
            .with_context(|| format!("reading settings from {}", path.display()))?,
        None => FilterSettings::default(),
    };
    if let Some(model) = args.model {
        settings.speech_model = Some(model);
    }
    settings.use_signals = args.signals;

    let (samples, rate) = read_wav(&args.input)?;
    info!(
        input = %args.input.display(),
        rate,
        seconds = samples.len() as f64 / f64::from(rate.max(1)),
        "input loaded"
    );

    let host = Arc::new(CliHost::new());
    let filter = SpeechFilter::new(&settings, backend(), host.clone())
        .context("creating speech filter")?;
    filter.connect_result(|json| println!("{json}"));
    let mut messages = filter.subscribe_messages();

    filter.handle_event(SinkEvent::Caps { rate });
    filter.change_state(StateChange::NullToReady);
    match filter.change_state(StateChange::ReadyToPaused) {
        StateChangeReturn::Failure => {
            let reason = match &*host.status.lock() {
                LoadStatus::Failed(reason) => reason.clone(),
                _ => "unknown error".into(),
            };
            bail!("cannot start: {reason}");
        }
        StateChangeReturn::Async => host.wait_loaded()?,
        StateChangeReturn::Success => {}
    }
    filter.change_state(StateChange::PausedToPlaying);

    let per_buffer = (rate as usize * BUFFER_MS as usize / 1000).max(1);
    let lag = Duration::from_millis(args.lag_ms);
    let mut pts = Duration::ZERO;
    for chunk in samples.chunks(per_buffer) {
        let buffer = AudioBuffer::new(chunk.to_vec(), Some(pts));
        let step = buffer.duration(rate);
        host.set_clock(pts + lag);
        filter.chain(buffer);
        print_messages(&mut messages);
        pts += step;
    }
    filter.handle_event(SinkEvent::Eos);
    print_messages(&mut messages);

    let diag = filter.diagnostics();
    info!(
        buffers = diag.buffers,
        polled = diag.polled,
        throttled = diag.throttled,
        rejected = diag.rejected,
        "stream finished"
    );

    filter.change_state(StateChange::PlayingToPaused);
    filter.change_state(StateChange::PausedToReady);
    filter.change_state(StateChange::ReadyToNull);
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("murmur=info,murmur_core=info")),
        )
        .init();

    let result = parse_args().and_then(run);
    if let Err(e) = result {
        eprintln!("murmur: {e:#}");
        std::process::exit(1);
    }
}
