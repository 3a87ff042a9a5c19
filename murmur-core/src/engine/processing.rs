//! Per-buffer processing: denoise, accept, then decide whether to poll.
//!
//! Runs on the streaming thread with the session lock held. The buffer is
//! always forwarded downstream afterwards, whatever happens here.
//!
//! ## Catch-up
//!
//! When a buffer's timestamp trails the pipeline running time by more than
//! [`CATCH_UP_LAG`], results are only polled if at least
//! [`CATCH_UP_MIN_RECHECK`] of stream time has passed since the last polled
//! buffer. Audio is still accepted, so nothing is lost; only the result
//! extraction calls are thinned out.

use std::time::Duration;

use tracing::{debug, error, trace, warn};

use crate::buffering::AudioBuffer;
use crate::denoise::Denoise;
use crate::engine::session::Session;
use crate::inference::AcceptStatus;
use crate::ipc::events::ResultKind;
use crate::ipc::sink::ResultEmitter;

/// Lag behind the running time above which polling is throttled.
pub const CATCH_UP_LAG: Duration = Duration::from_millis(500);
/// Minimum stream time between polls while catching up.
pub const CATCH_UP_MIN_RECHECK: Duration = Duration::from_millis(200);

/// What happened to one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOutcome {
    /// First buffer without a recognizer; its timestamp became the baseline.
    Preroll,
    /// No recognizer; recognition skipped.
    Dropped,
    /// The recognizer rejected the samples.
    Rejected,
    /// Accepted, but result polling was skipped to catch up.
    Throttled,
    /// Accepted and polled.
    Polled,
}

/// Everything the engine reads outside the session.
pub struct BufferContext<'a> {
    pub denoise: &'a dyn Denoise,
    pub emitter: &'a ResultEmitter,
    pub rate: u32,
    pub running_time: Option<Duration>,
    /// Minimum ms between partial polls; negative disables partials.
    pub partial_interval_ms: i64,
}

pub fn process_buffer(
    session: &mut Session,
    ctx: &BufferContext<'_>,
    buffer: &mut AudioBuffer,
) -> BufferOutcome {
    if session.eos {
        debug!(pts = ?buffer.pts, "buffer after end of stream, not recognized");
        return BufferOutcome::Dropped;
    }
    if !session.has_recognizer() {
        if session.last_processed.is_none() {
            debug!(pts = ?buffer.pts, "no recognizer yet, recording pre-roll baseline");
            session.last_processed = buffer.pts;
            return BufferOutcome::Preroll;
        }
        warn!(pts = ?buffer.pts, "no recognizer available, buffer not recognized");
        return BufferOutcome::Dropped;
    }

    if buffer.is_empty() {
        trace!(pts = ?buffer.pts, "empty buffer");
        return BufferOutcome::Dropped;
    }

    ctx.denoise.maybe_init(ctx.rate);
    ctx.denoise.apply(&mut buffer.samples, ctx.rate);

    trace!(pts = ?buffer.pts, bytes = buffer.byte_len(), "accepting buffer");
    let status = match session.accept(&buffer.samples) {
        Ok(status) => status,
        Err(e) => {
            error!(pts = ?buffer.pts, error = %e, "recognizer rejected buffer");
            return BufferOutcome::Rejected;
        }
    };

    if session.last_processed.is_none() {
        session.last_processed = buffer.pts;
    }
    if should_throttle(buffer.pts, ctx.running_time, session.last_processed) {
        return BufferOutcome::Throttled;
    }
    if buffer.pts.is_some() {
        session.last_processed = buffer.pts;
    }

    if status == AcceptStatus::FinalReady {
        if let Some(json) = session.result() {
            ctx.emitter.emit(ResultKind::Result, json);
        }
        if let Some(pts) = buffer.pts {
            session.last_partial = pts;
        }
    } else if partial_due(buffer.pts, session.last_partial, ctx.partial_interval_ms) {
        if let Some(json) = session.partial_result() {
            ctx.emitter.emit(ResultKind::Partial, json);
        }
        if let Some(pts) = buffer.pts {
            session.last_partial = pts;
        }
    }

    BufferOutcome::Polled
}

/// Whether polling should be skipped for a buffer at `pts`.
///
/// Buffers without a timestamp, or a host without a clock, are never
/// throttled.
pub fn should_throttle(
    pts: Option<Duration>,
    running_time: Option<Duration>,
    last_processed: Option<Duration>,
) -> bool {
    let (Some(pts), Some(running_time)) = (pts, running_time) else {
        return false;
    };
    let Some(lag) = running_time.checked_sub(pts) else {
        return false;
    };
    if lag <= CATCH_UP_LAG {
        return false;
    }

    let Some(last) = last_processed else {
        return false;
    };
    match pts.checked_sub(last) {
        Some(since) if since >= CATCH_UP_MIN_RECHECK => {
            debug!(?lag, ?since, "catching up, polling");
            false
        }
        _ => {
            debug!(?lag, "catching up, skipping result poll");
            true
        }
    }
}

/// Whether a partial result should be polled for a buffer at `pts`.
pub fn partial_due(pts: Option<Duration>, last_partial: Duration, interval_ms: i64) -> bool {
    let Ok(interval_ms) = u64::try_from(interval_ms) else {
        return false;
    };
    let Some(pts) = pts else {
        return true;
    };
    pts.checked_sub(last_partial)
        .is_some_and(|since| since >= Duration::from_millis(interval_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use parking_lot::Mutex;

    use crate::denoise::PassthroughDenoise;
    use crate::error::Result;
    use crate::inference::json::NumberFormat;
    use crate::inference::{Recognizer, SpeechModel};
    use crate::ipc::sink::ResultHandler;

    const RATE: u32 = 16_000;

    /// Counts polls and returns a scripted partial each time.
    struct CountingRecognizer {
        polls: Arc<Mutex<usize>>,
        partials: Vec<&'static str>,
        current: String,
        final_every: Option<usize>,
        accepted: usize,
    }

    impl Recognizer for CountingRecognizer {
        fn accept_waveform(&mut self, _samples: &[i16]) -> Result<AcceptStatus> {
            self.accepted += 1;
            match self.final_every {
                Some(n) if self.accepted % n == 0 => Ok(AcceptStatus::FinalReady),
                _ => Ok(AcceptStatus::PartialReady),
            }
        }

        fn result(&mut self) -> Option<&str> {
            *self.polls.lock() += 1;
            self.current = format!("{{\n  \"text\" : \"utterance {}\"\n}}", self.accepted);
            Some(&self.current)
        }

        fn partial_result(&mut self) -> Option<&str> {
            let mut polls = self.polls.lock();
            let idx = (*polls).min(self.partials.len().saturating_sub(1));
            *polls += 1;
            self.current = self.partials.get(idx).copied().unwrap_or_default().to_string();
            Some(&self.current)
        }

        fn final_result(&mut self) -> Option<&str> {
            self.result()
        }

        fn reset(&mut self) {}

        fn set_max_alternatives(&mut self, _alternatives: u16) {}
    }

    struct CountingModel {
        polls: Arc<Mutex<usize>>,
        partials: Vec<&'static str>,
        final_every: Option<usize>,
    }

    impl SpeechModel for CountingModel {
        fn create_recognizer(&self, _sample_rate: f32) -> Result<Box<dyn Recognizer>> {
            Ok(Box::new(CountingRecognizer {
                polls: Arc::clone(&self.polls),
                partials: self.partials.clone(),
                current: String::new(),
                final_every: self.final_every,
                accepted: 0,
            }))
        }
    }

    fn live_session(
        partials: Vec<&'static str>,
        final_every: Option<usize>,
    ) -> (Session, Arc<Mutex<usize>>) {
        let polls = Arc::new(Mutex::new(0));
        let mut session = Session::new(0, NumberFormat::Verbatim);
        session.install(
            Arc::new(CountingModel {
                polls: Arc::clone(&polls),
                partials,
                final_every,
            }),
            RATE,
        );
        (session, polls)
    }

    fn collecting_emitter() -> (ResultEmitter, Arc<Mutex<Vec<String>>>) {
        let emitter = ResultEmitter::new(true);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: ResultHandler = Arc::new(move |json: &str| sink.lock().push(json.to_owned()));
        emitter.connect(handler);
        (emitter, seen)
    }

    fn ten_ms(pts_ms: u64) -> AudioBuffer {
        AudioBuffer::new(vec![0; 160], Some(Duration::from_millis(pts_ms)))
    }

    #[test]
    fn first_buffer_without_recognizer_is_preroll() {
        let mut session = Session::new(0, NumberFormat::Verbatim);
        let (emitter, _) = collecting_emitter();
        let ctx = BufferContext {
            denoise: &PassthroughDenoise,
            emitter: &emitter,
            rate: RATE,
            running_time: None,
            partial_interval_ms: 0,
        };

        assert_eq!(
            process_buffer(&mut session, &ctx, &mut ten_ms(40)),
            BufferOutcome::Preroll
        );
        assert_eq!(session.last_processed, Some(Duration::from_millis(40)));
        assert_eq!(
            process_buffer(&mut session, &ctx, &mut ten_ms(50)),
            BufferOutcome::Dropped
        );
        assert_eq!(session.last_processed, Some(Duration::from_millis(40)));
    }

    #[test]
    fn repeated_partials_emit_once() {
        let hello = "{\n  \"partial\" : \"hello\"\n}";
        let world = "{\n  \"partial\" : \"hello world\"\n}";
        let (mut session, _) = live_session(vec![hello, hello, hello, world], None);
        let (emitter, seen) = collecting_emitter();
        let ctx = BufferContext {
            denoise: &PassthroughDenoise,
            emitter: &emitter,
            rate: RATE,
            running_time: None,
            partial_interval_ms: 0,
        };

        for i in 0..4 {
            process_buffer(&mut session, &ctx, &mut ten_ms(i * 10));
        }
        assert_eq!(*seen.lock(), vec![hello.to_string(), world.to_string()]);
    }

    #[test]
    fn negative_interval_disables_partials() {
        let (mut session, polls) = live_session(vec!["{\"partial\": \"x\"}"], None);
        let (emitter, seen) = collecting_emitter();
        let ctx = BufferContext {
            denoise: &PassthroughDenoise,
            emitter: &emitter,
            rate: RATE,
            running_time: None,
            partial_interval_ms: -1,
        };
        for i in 0..10 {
            process_buffer(&mut session, &ctx, &mut ten_ms(i * 10));
        }
        assert_eq!(*polls.lock(), 0);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn partial_interval_spaces_polls() {
        let (mut session, polls) = live_session(vec!["{\"partial\": \"x\"}"], None);
        let (emitter, _) = collecting_emitter();
        let ctx = BufferContext {
            denoise: &PassthroughDenoise,
            emitter: &emitter,
            rate: RATE,
            running_time: None,
            partial_interval_ms: 100,
        };
        // 0..=990 ms in 10 ms steps; polls at 100, 200, ... 900.
        for i in 0..100 {
            process_buffer(&mut session, &ctx, &mut ten_ms(i * 10));
        }
        assert_eq!(*polls.lock(), 9);
    }

    #[test]
    fn final_result_suppresses_partial_for_same_buffer() {
        let (mut session, polls) = live_session(vec!["{\"partial\": \"x\"}"], Some(1));
        let (emitter, seen) = collecting_emitter();
        let ctx = BufferContext {
            denoise: &PassthroughDenoise,
            emitter: &emitter,
            rate: RATE,
            running_time: None,
            partial_interval_ms: 0,
        };
        process_buffer(&mut session, &ctx, &mut ten_ms(0));
        assert_eq!(*polls.lock(), 1);
        assert_eq!(seen.lock().len(), 1);
        assert!(seen.lock()[0].contains("\"text\""));
    }

    #[test]
    fn catch_up_limits_poll_rate() {
        let (mut session, polls) = live_session(vec!["{\"partial\": \"x\"}"], None);
        let (emitter, _) = collecting_emitter();

        // 100 buffers of 10 ms, all arriving while the clock is 600 ms ahead.
        let mut outcomes = Vec::new();
        for i in 0..100u64 {
            let pts = i * 10;
            let ctx = BufferContext {
                denoise: &PassthroughDenoise,
                emitter: &emitter,
                rate: RATE,
                running_time: Some(Duration::from_millis(pts + 600)),
                partial_interval_ms: 0,
            };
            outcomes.push(process_buffer(&mut session, &ctx, &mut ten_ms(pts)));
        }

        let polled = outcomes
            .iter()
            .filter(|o| **o == BufferOutcome::Polled)
            .count();
        // First buffer only sets the baseline, then one poll per 200 ms.
        assert_eq!(outcomes[0], BufferOutcome::Throttled);
        assert_eq!(polled, 4);
        assert_eq!(*polls.lock(), polled);
    }

    #[test]
    fn lagging_first_buffer_seeds_baseline_and_is_throttled() {
        let (mut session, polls) = live_session(vec!["{\"partial\": \"x\"}"], None);
        let (emitter, _) = collecting_emitter();
        let ctx = BufferContext {
            denoise: &PassthroughDenoise,
            emitter: &emitter,
            rate: RATE,
            running_time: Some(Duration::from_millis(2_000)),
            partial_interval_ms: 0,
        };

        assert_eq!(
            process_buffer(&mut session, &ctx, &mut ten_ms(700)),
            BufferOutcome::Throttled
        );
        assert_eq!(session.last_processed, Some(Duration::from_millis(700)));
        assert_eq!(*polls.lock(), 0);
    }

    #[test]
    fn empty_buffer_is_not_accepted() {
        let (mut session, polls) = live_session(vec!["{\"partial\": \"x\"}"], Some(1));
        let (emitter, seen) = collecting_emitter();
        let ctx = BufferContext {
            denoise: &PassthroughDenoise,
            emitter: &emitter,
            rate: RATE,
            running_time: None,
            partial_interval_ms: 0,
        };

        let mut empty = AudioBuffer::new(Vec::new(), Some(Duration::from_millis(10)));
        assert_eq!(
            process_buffer(&mut session, &ctx, &mut empty),
            BufferOutcome::Dropped
        );
        assert_eq!(*polls.lock(), 0);
        assert!(seen.lock().is_empty());
        assert_eq!(session.last_processed, None);
    }

    #[test]
    fn buffers_after_end_of_stream_are_not_recognized() {
        let (mut session, polls) = live_session(vec!["{\"partial\": \"x\"}"], None);
        let (emitter, seen) = collecting_emitter();
        let ctx = BufferContext {
            denoise: &PassthroughDenoise,
            emitter: &emitter,
            rate: RATE,
            running_time: None,
            partial_interval_ms: 0,
        };

        session.eos = true;
        assert_eq!(
            process_buffer(&mut session, &ctx, &mut ten_ms(0)),
            BufferOutcome::Dropped
        );
        assert_eq!(*polls.lock(), 0);
        assert!(seen.lock().is_empty());

        session.flush();
        assert_eq!(
            process_buffer(&mut session, &ctx, &mut ten_ms(10)),
            BufferOutcome::Polled
        );
    }

    #[test]
    fn small_lag_always_polls() {
        assert!(!should_throttle(
            Some(Duration::from_millis(1_000)),
            Some(Duration::from_millis(1_500)),
            Some(Duration::from_millis(990)),
        ));
        assert!(should_throttle(
            Some(Duration::from_millis(1_000)),
            Some(Duration::from_millis(1_501)),
            Some(Duration::from_millis(990)),
        ));
        assert!(!should_throttle(Some(Duration::ZERO), None, None));
    }

    #[test]
    fn partial_due_respects_interval() {
        let last = Duration::from_millis(100);
        assert!(partial_due(Some(Duration::from_millis(150)), last, 50));
        assert!(!partial_due(Some(Duration::from_millis(149)), last, 50));
        assert!(!partial_due(Some(Duration::from_millis(50)), last, 0));
        assert!(partial_due(None, last, 0));
        assert!(!partial_due(None, last, -1));
    }
}
