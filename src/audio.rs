//! Playback core: probing, decoding, output and the session controller.
//!
//! A session pipes raw PCM from an external decoder process into a rodio
//! sink. `PlaybackController` owns at most one such session at a time.

mod cancel;
mod controller;
mod decode;
mod error;
mod probe;
mod progress;
mod session;
mod sink;
mod types;

pub use cancel::CancelToken;
pub use controller::PlaybackController;
pub use decode::{DecodeHandle, DecodePipeline, Ffmpeg, Transcoder};
pub use error::{DecodeError, PlaybackError, ProbeError, SinkError};
pub use probe::{DurationProbe, Ffprobe, parse_probe_output};
pub use progress::{ProgressBus, ProgressTracker, clamp_elapsed};
pub use session::Released;
pub use sink::{AudioOutput, PcmSource, RodioOutput, SinkHandle};
pub use types::{PcmFormat, PlaybackInfo, Progress, SessionState};
