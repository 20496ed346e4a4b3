//! Error types for the playback core.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

/// Failure to obtain a track duration.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("failed to run probe: {0}")]
    Spawn(#[source] io::Error),

    #[error("failed to wait for probe: {0}")]
    Wait(#[source] io::Error),

    #[error("probe did not finish within {0:?}")]
    Timeout(Duration),

    #[error("probe exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },

    #[error("malformed probe output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("probe output has no duration field")]
    MissingDuration,

    #[error("unparsable duration {0:?}")]
    InvalidDuration(String),
}

/// Failure to launch the decode subprocess.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("failed to spawn decoder: {0}")]
    Spawn(#[source] io::Error),

    #[error("decoder has no {0} handle")]
    MissingStream(&'static str),

    #[error("failed to start decode thread: {0}")]
    Thread(#[source] io::Error),
}

/// Failure of the audio output device or a player bound to it.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("audio device error: {0}")]
    Device(String),

    #[error("audio device is no longer available")]
    Closed,
}

/// Failures surfaced by the synchronous path of `start`/`stop`.
#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("track has no path")]
    InvalidTrack,

    #[error("playback state lock poisoned")]
    Poisoned,

    #[error("failed to create pipe: {0}")]
    Pipe(#[source] io::Error),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}
