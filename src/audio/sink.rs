//! Audio output: the process-wide device and per-session players.
//!
//! The rodio `OutputStream` lives on its own thread for the lifetime of the
//! process. Sessions ask that thread for a paused `Sink` fed by a
//! `PcmSource` reading the pipe.

use std::io::{BufReader, PipeReader, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rodio::{OutputStreamBuilder, Sink, Source};
use tracing::{debug, error, info};

use super::error::SinkError;
use super::types::PcmFormat;

/// Bytes buffered between the pipe and the mixer.
const READ_BUFFER_BYTES: usize = 8 * 1024;

/// A player bound to one session's pipe reader.
pub trait SinkHandle: Send + Sync {
    /// Begin rendering. Non-blocking.
    fn play(&self);
    /// True while rendering and the stream has not ended.
    fn is_playing(&self) -> bool;
    /// Stop rendering and release the player. Idempotent.
    fn close(&self);
    fn is_closed(&self) -> bool;
}

/// The audio output device context.
pub trait AudioOutput: Send + Sync {
    /// Create a paused player consuming PCM from `reader`.
    fn open(&self, reader: PipeReader) -> Result<Arc<dyn SinkHandle>, SinkError>;
}

/// Raw s16le interleaved PCM read from a byte stream, as rodio samples.
///
/// Reads block until the producer supplies data; a closed producer or a
/// closed handle ends the source.
pub struct PcmSource<R> {
    reader: BufReader<R>,
    closed: Arc<AtomicBool>,
}

impl<R: Read> PcmSource<R> {
    pub fn new(reader: R, closed: Arc<AtomicBool>) -> Self {
        Self {
            reader: BufReader::with_capacity(READ_BUFFER_BYTES, reader),
            closed,
        }
    }
}

impl<R: Read> Iterator for PcmSource<R> {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.closed.load(Ordering::Relaxed) {
            return None;
        }
        let mut bytes = [0u8; PcmFormat::BYTES_PER_SAMPLE];
        self.reader.read_exact(&mut bytes).ok()?;
        Some(f32::from(i16::from_le_bytes(bytes)) / 32768.0)
    }
}

impl<R: Read> Source for PcmSource<R> {
    fn current_span_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        PcmFormat::CHANNELS
    }

    fn sample_rate(&self) -> u32 {
        PcmFormat::SAMPLE_RATE
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

type PipeSource = PcmSource<PipeReader>;

struct OpenRequest {
    source: PipeSource,
    reply: Sender<Sink>,
}

/// Default output device, opened once and kept on a dedicated thread.
pub struct RodioOutput {
    requests: Mutex<Sender<OpenRequest>>,
}

impl RodioOutput {
    /// Open the default output device. Blocks until it is ready.
    pub fn open_default() -> Result<Self, SinkError> {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), SinkError>>();
        let (req_tx, req_rx) = mpsc::channel::<OpenRequest>();

        thread::Builder::new()
            .name("audio-device".into())
            .spawn(move || {
                let mut stream = match OutputStreamBuilder::open_default_stream() {
                    Ok(s) => s,
                    Err(e) => {
                        error!(error = %e, "no audio output device");
                        let _ = ready_tx.send(Err(SinkError::Device(e.to_string())));
                        return;
                    }
                };
                // rodio logs to stderr when the stream is dropped, which
                // would scribble over the TUI.
                stream.log_on_drop(false);
                let _ = ready_tx.send(Ok(()));
                info!("audio output device ready");

                // Runs until the RodioOutput is dropped.
                for req in req_rx {
                    let sink = Sink::connect_new(stream.mixer());
                    sink.pause();
                    sink.append(req.source);
                    let _ = req.reply.send(sink);
                }
                debug!("audio device thread exiting");
            })
            .map_err(|e| SinkError::Device(e.to_string()))?;

        ready_rx.recv().map_err(|_| SinkError::Closed)??;
        Ok(Self {
            requests: Mutex::new(req_tx),
        })
    }
}

impl AudioOutput for RodioOutput {
    fn open(&self, reader: PipeReader) -> Result<Arc<dyn SinkHandle>, SinkError> {
        let closed = Arc::new(AtomicBool::new(false));
        let (reply_tx, reply_rx) = mpsc::channel();
        let request = OpenRequest {
            source: PcmSource::new(reader, closed.clone()),
            reply: reply_tx,
        };

        self.requests
            .lock()
            .map_err(|_| SinkError::Closed)?
            .send(request)
            .map_err(|_| SinkError::Closed)?;
        let sink = reply_rx.recv().map_err(|_| SinkError::Closed)?;

        Ok(Arc::new(RodioSink { sink, closed }))
    }
}

struct RodioSink {
    sink: Sink,
    closed: Arc<AtomicBool>,
}

impl SinkHandle for RodioSink {
    fn play(&self) {
        if !self.is_closed() {
            self.sink.play();
        }
    }

    fn is_playing(&self) -> bool {
        !self.is_closed() && !self.sink.is_paused() && !self.sink.empty()
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // The source sees `closed` on its next sample and the mixer drops
        // it, closing the pipe reader.
        self.sink.stop();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for RodioSink {
    fn drop(&mut self) {
        self.close();
    }
}
