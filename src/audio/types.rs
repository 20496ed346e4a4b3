//! Audio-related small types.
//!
//! The PCM layout shared by the decoder and the sink, the lifecycle states
//! of a session and the snapshots published to observers.

use std::time::Duration;

use crate::library::Track;

/// Fixed PCM layout produced by the decoder and consumed by the sink.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PcmFormat;

impl PcmFormat {
    pub const SAMPLE_RATE: u32 = 44_100;
    pub const CHANNELS: u16 = 2;
    /// Signed 16-bit little-endian.
    pub const BYTES_PER_SAMPLE: usize = 2;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No session.
    #[default]
    Idle,
    /// Probing and acquiring resources.
    Initializing,
    /// Decoder and sink are running.
    Playing,
    /// The sink drained the whole stream.
    Finished,
    /// Stopped or replaced by the controller.
    Cancelled,
    /// The decoder exited with an error.
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled | Self::Failed)
    }
}

/// Elapsed/total pair as seen by a progress control.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Progress {
    pub elapsed: Duration,
    /// Upper bound of the progress control. Zero when the probe failed.
    pub total: Duration,
}

impl Progress {
    /// Whether `total` is a usable upper bound.
    pub fn is_bounded(&self) -> bool {
        !self.total.is_zero()
    }

    /// Fraction in `0.0..=1.0`, or `None` when the bound is unknown.
    pub fn ratio(&self) -> Option<f64> {
        if !self.is_bounded() {
            return None;
        }
        Some((self.elapsed.as_secs_f64() / self.total.as_secs_f64()).clamp(0.0, 1.0))
    }
}

#[derive(Debug, Clone, Default)]
/// Snapshot of the controller's playback published to observers.
pub struct PlaybackInfo {
    /// Session the snapshot belongs to; `0` before any session.
    pub session: u64,
    pub track: Option<Track>,
    pub state: SessionState,
    pub progress: Progress,
}
