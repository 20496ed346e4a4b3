//! Progress publication.
//!
//! `ProgressBus` is the observable playback value: it keeps the latest
//! `PlaybackInfo` and forwards every accepted update to subscribers over
//! channels, so the UI thread applies them when it drains its receiver.
//! `ProgressTracker` is the per-session sampler feeding it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::cancel::CancelToken;
use super::sink::SinkHandle;
use super::types::{PlaybackInfo, Progress, SessionState};
use crate::library::Track;

#[derive(Default)]
pub struct ProgressBus {
    latest: Mutex<PlaybackInfo>,
    subscribers: Mutex<Vec<Sender<PlaybackInfo>>>,
}

impl ProgressBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. Updates are queued until the receiver drains them.
    pub fn subscribe(&self) -> Receiver<PlaybackInfo> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }
        rx
    }

    pub fn snapshot(&self) -> PlaybackInfo {
        self.latest
            .lock()
            .map(|info| info.clone())
            .unwrap_or_default()
    }

    pub fn progress(&self) -> Progress {
        self.latest
            .lock()
            .map(|info| info.progress)
            .unwrap_or_default()
    }

    /// Make `session` the current one and announce it.
    pub(super) fn begin(&self, session: u64, track: Track) {
        self.replace(PlaybackInfo {
            session,
            track: Some(track),
            state: SessionState::Initializing,
            progress: Progress::default(),
        });
    }

    /// Return to the empty state. Publishes from any earlier session are
    /// rejected from here on.
    pub(super) fn reset(&self) {
        self.replace(PlaybackInfo::default());
    }

    /// Publish on behalf of `session`. Ignored unless it is the current one.
    pub(super) fn publish(&self, session: u64, state: SessionState, progress: Progress) -> bool {
        let Ok(mut latest) = self.latest.lock() else {
            return false;
        };
        if latest.session != session {
            return false;
        }
        latest.state = state;
        latest.progress = progress;
        // Notify under the `latest` lock so subscribers see updates in the
        // same order they were applied.
        self.notify(&latest);
        true
    }

    fn replace(&self, info: PlaybackInfo) {
        if let Ok(mut latest) = self.latest.lock() {
            *latest = info;
            self.notify(&latest);
        }
    }

    fn notify(&self, info: &PlaybackInfo) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.retain(|tx| tx.send(info.clone()).is_ok());
        }
    }
}

/// Clamp wall-clock elapsed time to the session's upper bound.
pub fn clamp_elapsed(elapsed: Duration, total: Duration) -> Duration {
    elapsed.min(total)
}

/// Everything a tracker needs from its session.
pub(super) struct TrackerContext {
    pub session: u64,
    pub sink: Arc<dyn SinkHandle>,
    pub cancel: CancelToken,
    pub decode_failed: Arc<AtomicBool>,
    pub started_at: Instant,
    pub total: Duration,
    pub interval: Duration,
    pub bus: Arc<ProgressBus>,
    /// Told the session id when playback ends without being cancelled.
    pub ended: Sender<u64>,
}

/// Periodic sampler publishing `(elapsed, total)` while the sink plays.
pub struct ProgressTracker {
    join: Option<JoinHandle<SessionState>>,
}

impl ProgressTracker {
    pub(super) fn spawn(ctx: TrackerContext) -> Self {
        let join = thread::Builder::new()
            .name(format!("progress-{}", ctx.session))
            .spawn(move || run(ctx));
        match join {
            Ok(join) => Self { join: Some(join) },
            Err(e) => {
                warn!(error = %e, "failed to start progress tracker");
                Self { join: None }
            }
        }
    }

    /// Wait up to `grace` for the loop to exit.
    ///
    /// Returns `false` if it was still running; it is then left detached.
    pub fn join(mut self, grace: Duration) -> bool {
        let Some(join) = self.join.take() else {
            return true;
        };
        let deadline = Instant::now() + grace;
        while !join.is_finished() {
            if Instant::now() >= deadline {
                warn!(?grace, "progress tracker still running after grace, detaching");
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        let _ = join.join();
        true
    }
}

fn run(ctx: TrackerContext) -> SessionState {
    let mut last = Duration::ZERO;
    loop {
        if ctx.cancel.is_cancelled() || !ctx.sink.is_playing() {
            break;
        }

        let elapsed = clamp_elapsed(ctx.started_at.elapsed(), ctx.total).max(last);
        last = elapsed;
        ctx.bus.publish(
            ctx.session,
            SessionState::Playing,
            Progress {
                elapsed,
                total: ctx.total,
            },
        );

        if ctx.cancel.wait(ctx.interval) {
            break;
        }
    }

    let state = if ctx.cancel.is_cancelled() {
        SessionState::Cancelled
    } else if ctx.decode_failed.load(Ordering::SeqCst) {
        SessionState::Failed
    } else {
        SessionState::Finished
    };
    debug!(session = ctx.session, ?state, "progress tracker done");

    ctx.bus.publish(
        ctx.session,
        state,
        Progress {
            elapsed: last,
            total: ctx.total,
        },
    );
    if state != SessionState::Cancelled {
        let _ = ctx.ended.send(ctx.session);
    }
    state
}
