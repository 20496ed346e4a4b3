use std::io;
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::cancel::CancelToken;
use super::decode::{DecodeHandle, DecodePipeline};
use super::error::PlaybackError;
use super::progress::{ProgressBus, ProgressTracker, TrackerContext};
use super::sink::{AudioOutput, SinkHandle};
use super::types::SessionState;
use crate::library::Track;

/// Outcome of releasing a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Released {
    pub state: SessionState,
    /// Both background tasks exited within the grace period.
    pub tasks_joined: bool,
}

/// One playback attempt for one track.
///
/// Owns the decode subprocess (and through it the pipe writer), the sink
/// (and through it the pipe reader) and the progress tracker. Each is
/// released exactly once, by `shutdown` or on drop.
pub struct PlaybackSession {
    id: u64,
    track: Track,
    decode: Option<DecodeHandle>,
    sink: Option<Arc<dyn SinkHandle>>,
    tracker: Option<ProgressTracker>,
    cancel: CancelToken,
    grace: Duration,
}

impl PlaybackSession {
    /// Acquire pipe, sink and decoder for `track`, then start rendering.
    ///
    /// The sink is opened before the decoder so a device failure never
    /// leaves a subprocess behind.
    pub(super) fn launch(
        id: u64,
        track: Track,
        total: Duration,
        output: &dyn AudioOutput,
        pipeline: &DecodePipeline,
        bus: Arc<ProgressBus>,
        interval: Duration,
        ended: Sender<u64>,
    ) -> Result<Self, PlaybackError> {
        let (reader, writer) = io::pipe().map_err(PlaybackError::Pipe)?;
        let cancel = CancelToken::new();

        let sink = output.open(reader)?;
        let decode = match pipeline.launch(&track.path, writer, cancel.clone()) {
            Ok(d) => d,
            Err(e) => {
                sink.close();
                return Err(e.into());
            }
        };

        sink.play();
        let started_at = Instant::now();
        let tracker = ProgressTracker::spawn(TrackerContext {
            session: id,
            sink: sink.clone(),
            cancel: cancel.clone(),
            decode_failed: decode.failure_flag(),
            started_at,
            total,
            interval,
            bus,
            ended,
        });
        info!(session = id, path = %track.path.display(), ?total, "playback started");

        Ok(Self {
            id,
            track,
            decode: Some(decode),
            sink: Some(sink),
            tracker: Some(tracker),
            cancel,
            grace: pipeline.grace(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn track(&self) -> &Track {
        &self.track
    }

    /// Whether the sink is still rendering.
    pub fn is_playing(&self) -> bool {
        self.sink.as_ref().is_some_and(|s| s.is_playing())
    }

    /// Cancel and release everything, waiting a bounded time for the
    /// background tasks to exit.
    pub fn shutdown(mut self) -> Released {
        self.release()
    }

    fn release(&mut self) -> Released {
        self.cancel.cancel();

        // Killing the decoder unblocks the forwarding thread, which then
        // closes the pipe writer.
        if let Some(decode) = self.decode.as_ref() {
            decode.close();
        }
        if let Some(sink) = self.sink.take() {
            sink.close();
        }

        let mut state = SessionState::Cancelled;
        let mut tasks_joined = true;
        if let Some(decode) = self.decode.take() {
            if decode.failed() {
                state = SessionState::Failed;
            }
            tasks_joined &= decode.join(self.grace);
        }
        if let Some(tracker) = self.tracker.take() {
            tasks_joined &= tracker.join(self.grace);
        }

        if tasks_joined {
            debug!(session = self.id, ?state, "session released");
        } else {
            warn!(session = self.id, ?state, "session released with detached tasks");
        }
        Released {
            state,
            tasks_joined,
        }
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        if self.sink.is_some() || self.decode.is_some() || self.tracker.is_some() {
            self.release();
        }
    }
}
