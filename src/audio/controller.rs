//! The playback orchestrator.
//!
//! `PlaybackController` holds at most one `PlaybackSession`. Session
//! transitions are serialized by a transition lock that is never held across
//! the duration probe; the `current` slot itself is only locked to swap the
//! session in or out. A reaper thread releases sessions that end on their
//! own.

use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::decode::{DecodePipeline, Transcoder};
use super::error::PlaybackError;
use super::probe::DurationProbe;
use super::progress::ProgressBus;
use super::session::{PlaybackSession, Released};
use super::sink::AudioOutput;
use super::types::{PlaybackInfo, Progress};
use crate::config::{DecoderSettings, PlaybackSettings};
use crate::library::Track;

/// State shared with the reaper thread.
struct Slot {
    transition: Mutex<()>,
    current: Mutex<Option<PlaybackSession>>,
    /// Background tasks left running after a release grace expired.
    detached: AtomicUsize,
}

impl Slot {
    /// Take the session out of `current` if `id` matches (any session when
    /// `id` is `None`). Caller must hold the transition lock.
    fn take(&self, id: Option<u64>) -> Result<Option<PlaybackSession>, PlaybackError> {
        let mut current = self.current.lock().map_err(|_| PlaybackError::Poisoned)?;
        if id.is_none_or(|id| current.as_ref().is_some_and(|s| s.id() == id)) {
            Ok(current.take())
        } else {
            Ok(None)
        }
    }

    fn release(&self, session: PlaybackSession) -> Released {
        let report = session.shutdown();
        if !report.tasks_joined {
            self.detached.fetch_add(1, Ordering::SeqCst);
        }
        report
    }
}

pub struct PlaybackController {
    output: Arc<dyn AudioOutput>,
    prober: Arc<dyn DurationProbe>,
    pipeline: DecodePipeline,
    bus: Arc<ProgressBus>,
    progress_interval: Duration,
    release_grace: Duration,
    slot: Arc<Slot>,
    /// Bumped by every `start` and `stop`; a `start` whose ticket is no
    /// longer the latest does not launch.
    generation: AtomicU64,
    next_id: AtomicU64,
    ended: Sender<u64>,
}

impl PlaybackController {
    pub fn new(
        output: Arc<dyn AudioOutput>,
        transcoder: Arc<dyn Transcoder>,
        prober: Arc<dyn DurationProbe>,
        decoder: &DecoderSettings,
        playback: &PlaybackSettings,
    ) -> Self {
        let slot = Arc::new(Slot {
            transition: Mutex::new(()),
            current: Mutex::new(None),
            detached: AtomicUsize::new(0),
        });
        let (ended, ended_rx) = mpsc::channel();
        spawn_reaper(slot.clone(), ended_rx);

        Self {
            output,
            prober,
            pipeline: DecodePipeline::new(
                transcoder,
                Duration::from_millis(decoder.shutdown_grace_ms),
            ),
            bus: Arc::new(ProgressBus::new()),
            progress_interval: Duration::from_millis(playback.progress_interval_ms.max(1)),
            release_grace: Duration::from_millis(playback.device_release_grace_ms),
            slot,
            generation: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            ended,
        }
    }

    /// Stop whatever is playing, then start `track`.
    ///
    /// The prior session is fully released before anything else happens.
    /// The duration probe runs without holding the transition lock, so a
    /// concurrent `stop` is never held up by it; a `start` or `stop` issued
    /// meanwhile supersedes this one, which then returns `Ok` without
    /// launching. A failed probe is logged and playback proceeds with an
    /// unknown (zero) total. Sink and decoder launch failures leave the
    /// controller empty and are returned.
    pub fn start(&self, track: &Track) -> Result<(), PlaybackError> {
        if track.path.as_os_str().is_empty() {
            return Err(PlaybackError::InvalidTrack);
        }
        let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let released = {
            let _transition = self.lock_transition()?;
            self.stop_current()?.is_some()
        };

        let total = match self.prober.probe(&track.path) {
            Ok(d) => d,
            Err(e) => {
                warn!(path = %track.path.display(), error = %e, "duration probe failed, total unknown");
                Duration::ZERO
            }
        };

        let _transition = self.lock_transition()?;
        if self.generation.load(Ordering::SeqCst) != ticket {
            debug!(path = %track.path.display(), "start superseded before launch");
            return Ok(());
        }
        // An older start may have launched while we were probing.
        let released = self.stop_current()?.is_some() || released;
        if released && !self.release_grace.is_zero() {
            // Give the driver time to let go of the device.
            thread::sleep(self.release_grace);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut track = track.clone();
        track.duration = Some(total);
        self.bus.begin(id, track.clone());

        let session = PlaybackSession::launch(
            id,
            track,
            total,
            self.output.as_ref(),
            &self.pipeline,
            self.bus.clone(),
            self.progress_interval,
            self.ended.clone(),
        );
        let session = match session {
            Ok(s) => s,
            Err(e) => {
                warn!(session = id, error = %e, "failed to launch playback");
                self.bus.reset();
                return Err(e);
            }
        };

        let mut current = self
            .slot
            .current
            .lock()
            .map_err(|_| PlaybackError::Poisoned)?;
        *current = Some(session);
        Ok(())
    }

    /// Run `start` on a background thread and return without waiting.
    ///
    /// The handle yields the same result `start` would.
    pub fn spawn_start(
        self: &Arc<Self>,
        track: Track,
    ) -> io::Result<JoinHandle<Result<(), PlaybackError>>> {
        let controller = Arc::clone(self);
        thread::Builder::new()
            .name("start".into())
            .spawn(move || controller.start(&track))
    }

    /// Stop and fully release the current session.
    ///
    /// Returns how the release went, or `None` when idle. Also cancels any
    /// `start` still probing.
    pub fn stop(&self) -> Result<Option<Released>, PlaybackError> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let _transition = self.lock_transition()?;
        self.stop_current()
    }

    /// Latest `(elapsed, total)`. Never blocks on `start`/`stop`.
    pub fn progress(&self) -> Progress {
        self.bus.progress()
    }

    pub fn info(&self) -> PlaybackInfo {
        self.bus.snapshot()
    }

    /// Receive every published snapshot. Drain it on the UI thread.
    pub fn subscribe(&self) -> Receiver<PlaybackInfo> {
        self.bus.subscribe()
    }

    /// Whether a session is held. Sessions that end on their own are
    /// released shortly after their final state is published.
    pub fn has_session(&self) -> bool {
        self.slot
            .current
            .lock()
            .map(|c| c.is_some())
            .unwrap_or(false)
    }

    /// Whether the held session's sink is rendering.
    pub fn is_playing(&self) -> bool {
        self.slot
            .current
            .lock()
            .map(|c| c.as_ref().is_some_and(|s| s.is_playing()))
            .unwrap_or(false)
    }

    /// Background tasks that outlived their release grace since startup.
    pub fn detached_tasks(&self) -> usize {
        self.slot.detached.load(Ordering::SeqCst)
    }

    fn lock_transition(&self) -> Result<std::sync::MutexGuard<'_, ()>, PlaybackError> {
        self.slot
            .transition
            .lock()
            .map_err(|_| PlaybackError::Poisoned)
    }

    /// Caller must hold the transition lock.
    fn stop_current(&self) -> Result<Option<Released>, PlaybackError> {
        let Some(session) = self.slot.take(None)? else {
            return Ok(None);
        };

        let id = session.id();
        info!(session = id, path = %session.track().path.display(), "stopping playback");
        let report = self.slot.release(session);
        info!(session = id, state = ?report.state, joined = report.tasks_joined, "playback stopped");
        self.bus.reset();
        Ok(Some(report))
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        let session = self.slot.current.lock().ok().and_then(|mut c| c.take());
        if let Some(session) = session {
            self.slot.release(session);
        }
    }
}

/// Release sessions whose tracker reported a natural end. The final state
/// stays published so observers still see how playback ended.
fn spawn_reaper(slot: Arc<Slot>, ended: Receiver<u64>) {
    let spawned = thread::Builder::new()
        .name("session-reaper".into())
        .spawn(move || {
            for id in ended {
                let Ok(_transition) = slot.transition.lock() else {
                    break;
                };
                match slot.take(Some(id)) {
                    Ok(Some(session)) => {
                        let report = slot.release(session);
                        info!(session = id, joined = report.tasks_joined, "playback ended");
                    }
                    Ok(None) => {}
                    Err(_) => break,
                }
            }
            debug!("session reaper exiting");
        });
    if let Err(e) = spawned {
        warn!(error = %e, "failed to start session reaper, ended sessions stay until the next stop");
    }
}
