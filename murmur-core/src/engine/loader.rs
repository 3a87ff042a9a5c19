//! Background model loading.
//!
//! Model construction can take seconds, so it runs on a dedicated thread fed
//! by a single-slot `crossbeam_channel`. A newer request replaces a queued
//! one that has not started yet; the replaced request's token is cancelled.
//!
//! ```text
//! change_state ──submit──► [ bounded(1) ] ──► murmur-model-loader
//!                                                  │ token cancelled? → skip
//!                                                  │ backend.load_model()   (no locks held)
//!                                                  │ lock session, clear token
//!                                                  │ token cancelled? → drop model
//!                                                  └ install, async_done / abort
//! ```
//!
//! Cancellation is cooperative: an in-progress construction is never
//! interrupted, its result is discarded at the commit point instead.

use std::io;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, error, info, info_span, warn};

use crate::engine::Shared;
use crate::ipc::events::LifecyclePhase;

pub const LOADER_THREAD_NAME: &str = "murmur-model-loader";

/// One-shot cancellation flag shared between requester and worker.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this call performed the cancellation.
    pub fn cancel(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Whether both handles refer to the same token.
    pub fn same_as(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// A model construction request.
#[derive(Debug, Clone)]
pub struct PendingLoad {
    pub path: PathBuf,
    pub token: CancellationToken,
}

/// Owns the loader thread. Dropping it closes the queue and joins the thread
/// after the current job, if any, finishes.
pub struct ModelLoader {
    tx: Option<Sender<PendingLoad>>,
    /// Used to evict a stale queued request when the slot is full.
    queued: Receiver<PendingLoad>,
    handle: Option<JoinHandle<()>>,
}

impl ModelLoader {
    /// Spawn the loader thread running `job` for every request that is not
    /// already cancelled when dequeued.
    ///
    /// # Errors
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn<F>(mut job: F) -> io::Result<Self>
    where
        F: FnMut(PendingLoad) + Send + 'static,
    {
        let (tx, rx) = bounded::<PendingLoad>(1);
        let queued = rx.clone();

        let handle = thread::Builder::new()
            .name(LOADER_THREAD_NAME.into())
            .spawn(move || {
                for load in rx.iter() {
                    if load.token.is_cancelled() {
                        info!(path = %load.path.display(), "model creation cancelled before start");
                        continue;
                    }
                    job(load);
                }
                debug!("model loader exiting");
            })?;

        Ok(Self {
            tx: Some(tx),
            queued,
            handle: Some(handle),
        })
    }

    /// Queue `load`, replacing a request that is still waiting.
    pub fn submit(&self, load: PendingLoad) {
        let Some(tx) = self.tx.as_ref() else {
            return;
        };
        let mut load = load;
        loop {
            match tx.try_send(load) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    if let Ok(stale) = self.queued.try_recv() {
                        stale.token.cancel();
                        debug!(path = %stale.path.display(), "replaced queued model load");
                    }
                    load = back;
                }
                Err(TrySendError::Disconnected(back)) => {
                    error!(path = %back.path.display(), "model loader is gone, dropping request");
                    return;
                }
            }
        }
    }
}

impl Drop for ModelLoader {
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("model loader thread panicked");
            }
        }
    }
}

/// Body of the loader thread for a `SpeechFilter`.
pub(crate) fn execute(shared: &Shared, load: PendingLoad) {
    let span = info_span!("model_load", path = %load.path.display());
    let _enter = span.enter();

    info!("creating model");
    let loaded = shared.backend.load_model(&load.path);

    let mut session = shared.session.lock();
    // Point of no return: from here on nobody can cancel this load.
    if session
        .token
        .as_ref()
        .is_some_and(|current| current.same_as(&load.token))
    {
        session.token = None;
    }

    if load.token.is_cancelled() {
        drop(session);
        info!("model creation cancelled, dropping result");
        drop(loaded);
        return;
    }

    let model = match loaded {
        Ok(model) => model,
        Err(e) => {
            drop(session);
            error!(error = %e, "could not create model");
            shared.pending_state.lock().take();
            shared.set_phase(LifecyclePhase::Idle, Some(e.to_string()));
            shared.host.post_error(&e);
            shared.host.abort_state();
            return;
        }
    };

    let rate = shared.sample_rate();
    if session.install(model, rate) {
        shared.denoise.maybe_init(rate);
    }
    shared.complete_async_transition();
    shared.set_phase(LifecyclePhase::Ready, None);
    drop(session);

    info!("model ready");
    shared.host.async_done();
}
