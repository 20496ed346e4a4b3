//! Decode subprocess management.
//!
//! `DecodePipeline::launch` spawns the transcoder with its stdout piped and
//! starts a forwarding thread that copies the PCM stream into the session's
//! pipe writer. The forwarding thread owns the writer: the consumer sees
//! end-of-stream as soon as the thread exits, whatever the reason.

use std::io::{self, PipeWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::cancel::CancelToken;
use super::error::DecodeError;
use super::types::PcmFormat;

const CHUNK_BYTES: usize = 16 * 1024;
const REAP_POLL: Duration = Duration::from_millis(10);
/// Cap on captured decoder diagnostics; the rest is drained and discarded.
const MAX_DIAGNOSTIC_BYTES: u64 = 64 * 1024;

/// Builds the subprocess that turns a file into raw PCM on stdout.
///
/// Output must use the `PcmFormat` layout.
pub trait Transcoder: Send + Sync {
    fn command(&self, path: &Path) -> Command;
}

/// `ffmpeg` writing interleaved s16le PCM to `pipe:1`.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    program: PathBuf,
}

impl Ffmpeg {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl Transcoder for Ffmpeg {
    fn command(&self, path: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(["-hide_banner", "-loglevel", "error", "-nostdin", "-i"])
            .arg(path)
            .args(["-vn", "-acodec", "pcm_s16le", "-f", "s16le"])
            .arg("-ac")
            .arg(PcmFormat::CHANNELS.to_string())
            .arg("-ar")
            .arg(PcmFormat::SAMPLE_RATE.to_string())
            // Overwrite rather than append to the output target.
            .args(["-y", "pipe:1"]);
        cmd
    }
}

/// Launches decode subprocesses for sessions.
#[derive(Clone)]
pub struct DecodePipeline {
    transcoder: Arc<dyn Transcoder>,
    grace: Duration,
}

impl DecodePipeline {
    /// `grace` bounds how long a subprocess may linger after its output
    /// closed before it is killed.
    pub fn new(transcoder: Arc<dyn Transcoder>, grace: Duration) -> Self {
        Self { transcoder, grace }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Spawn the decoder for `path`, forwarding its PCM into `writer`.
    pub fn launch(
        &self,
        path: &Path,
        writer: PipeWriter,
        cancel: CancelToken,
    ) -> Result<DecodeHandle, DecodeError> {
        let mut cmd = self.transcoder.command(path);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(DecodeError::Spawn)?;
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(DecodeError::MissingStream("stdout/stderr"));
        };
        debug!(path = %path.display(), pid = child.id(), "decoder spawned");

        let child = Arc::new(Mutex::new(child));
        let failed = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let forwarder = Forwarder {
            path: path.to_path_buf(),
            child: child.clone(),
            stdout,
            stderr,
            writer,
            cancel,
            failed: failed.clone(),
            grace: self.grace,
        };

        let join = thread::Builder::new()
            .name("decode".into())
            .spawn(move || forwarder.run(done_tx));
        let join = match join {
            Ok(j) => j,
            Err(e) => {
                if let Ok(mut c) = child.lock() {
                    let _ = c.kill();
                    let _ = c.wait();
                }
                return Err(DecodeError::Thread(e));
            }
        };

        Ok(DecodeHandle {
            child,
            join: Some(join),
            done: done_rx,
            failed,
            killed: AtomicBool::new(false),
        })
    }
}

/// Exclusive handle to a running decode subprocess and its forwarding thread.
pub struct DecodeHandle {
    child: Arc<Mutex<Child>>,
    join: Option<JoinHandle<()>>,
    done: Receiver<()>,
    failed: Arc<AtomicBool>,
    killed: AtomicBool,
}

impl DecodeHandle {
    /// Terminate the subprocess. The forwarding thread then sees EOF,
    /// drops the pipe writer and exits. Idempotent.
    pub fn close(&self) {
        if self.killed.swap(true, Ordering::SeqCst) {
            return;
        }
        let Ok(mut child) = self.child.lock() else {
            return;
        };
        if let Ok(None) = child.try_wait() {
            if let Err(e) = child.kill() {
                debug!(error = %e, "decoder kill failed");
            }
        }
    }

    /// Whether the decoder reported a failure.
    pub fn failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    pub(super) fn failure_flag(&self) -> Arc<AtomicBool> {
        self.failed.clone()
    }

    /// Wait up to `grace` for the forwarding thread to exit.
    ///
    /// Returns `false` if it was still running; it is then left detached.
    pub fn join(mut self, grace: Duration) -> bool {
        match self.done.recv_timeout(grace) {
            Err(RecvTimeoutError::Timeout) => {
                warn!(?grace, "decode task still running after grace, detaching");
                false
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(j) = self.join.take() {
                    let _ = j.join();
                }
                true
            }
        }
    }
}

impl Drop for DecodeHandle {
    fn drop(&mut self) {
        self.close();
    }
}

enum PumpEnd {
    Eof,
    Cancelled,
    ConsumerGone(io::Error),
    ReadFailed(io::Error),
}

struct Forwarder {
    path: PathBuf,
    child: Arc<Mutex<Child>>,
    stdout: ChildStdout,
    stderr: ChildStderr,
    writer: PipeWriter,
    cancel: CancelToken,
    failed: Arc<AtomicBool>,
    grace: Duration,
}

impl Forwarder {
    fn run(self, _done: Sender<()>) {
        let Forwarder {
            path,
            child,
            mut stdout,
            stderr,
            mut writer,
            cancel,
            failed,
            grace,
        } = self;

        let diagnostics = thread::Builder::new()
            .name("decode-stderr".into())
            .spawn(move || collect_diagnostics(stderr))
            .ok();

        let end = pump(&mut stdout, &mut writer, &cancel);
        // Closing our read end makes a still-writing decoder exit on EPIPE.
        drop(stdout);
        let status = reap(&child, &cancel, grace);
        let diagnostics = diagnostics
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        let cancelled = cancel.is_cancelled() || matches!(end, PumpEnd::Cancelled);
        match (&end, status) {
            _ if cancelled => {
                debug!(path = %path.display(), "decode cancelled");
            }
            (PumpEnd::ReadFailed(e), _) => {
                failed.store(true, Ordering::SeqCst);
                warn!(path = %path.display(), error = %e, stderr = %diagnostics, "reading decoder output failed");
            }
            (PumpEnd::ConsumerGone(e), _) => {
                debug!(path = %path.display(), error = %e, "sink stopped reading");
            }
            (_, Some(status)) if !status.success() => {
                failed.store(true, Ordering::SeqCst);
                warn!(path = %path.display(), %status, stderr = %diagnostics, "decoder exited with failure");
            }
            (_, None) => {
                warn!(path = %path.display(), stderr = %diagnostics, "decoder exit status unavailable");
            }
            _ => {
                info!(path = %path.display(), "decode finished");
            }
        }

        // The consumer observes end-of-stream from here on.
        drop(writer);
    }
}

fn pump(src: &mut impl Read, dst: &mut impl Write, cancel: &CancelToken) -> PumpEnd {
    let mut buf = vec![0u8; CHUNK_BYTES];
    loop {
        if cancel.is_cancelled() {
            return PumpEnd::Cancelled;
        }
        let n = match src.read(&mut buf) {
            Ok(0) => return PumpEnd::Eof,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return PumpEnd::ReadFailed(e),
        };
        if let Err(e) = dst.write_all(&buf[..n]) {
            if cancel.is_cancelled() {
                return PumpEnd::Cancelled;
            }
            return PumpEnd::ConsumerGone(e);
        }
    }
}

/// Wait for the decoder to exit, killing it once cancelled or after `grace`.
fn reap(child: &Mutex<Child>, cancel: &CancelToken, grace: Duration) -> Option<ExitStatus> {
    let deadline = Instant::now() + grace;
    loop {
        {
            let mut child = child.lock().ok()?;
            match child.try_wait() {
                Ok(Some(status)) => return Some(status),
                Ok(None) if cancel.is_cancelled() || Instant::now() >= deadline => {
                    if !cancel.is_cancelled() {
                        warn!(pid = child.id(), "decoder did not exit after its output closed, killing");
                    }
                    let _ = child.kill();
                    return child.wait().ok();
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "waiting for decoder failed");
                    return None;
                }
            }
        }
        thread::sleep(REAP_POLL);
    }
}

fn collect_diagnostics(stderr: ChildStderr) -> String {
    let mut captured = Vec::new();
    let mut limited = stderr.take(MAX_DIAGNOSTIC_BYTES);
    let _ = limited.read_to_end(&mut captured);
    let _ = io::copy(&mut limited.into_inner(), &mut io::sink());
    String::from_utf8_lossy(&captured).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    #[test]
    fn ffmpeg_command_requests_s16le_stereo_44100_on_stdout() {
        let cmd = Ffmpeg::new("ffmpeg").command(Path::new("/music/a b.flac"));
        assert_eq!(cmd.get_program(), OsStr::new("ffmpeg"));

        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        let pair = |flag: &str| {
            args.iter()
                .position(|a| a == flag)
                .and_then(|i| args.get(i + 1))
                .cloned()
        };
        assert_eq!(pair("-i").as_deref(), Some("/music/a b.flac"));
        assert_eq!(pair("-f").as_deref(), Some("s16le"));
        assert_eq!(pair("-acodec").as_deref(), Some("pcm_s16le"));
        assert_eq!(pair("-ac").as_deref(), Some("2"));
        assert_eq!(pair("-ar").as_deref(), Some("44100"));
        assert!(args.contains(&"-y".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
    }

    #[test]
    fn pump_copies_until_eof() {
        let mut src: &[u8] = &[7u8; CHUNK_BYTES * 3 + 5];
        let mut dst = Vec::new();
        let end = pump(&mut src, &mut dst, &CancelToken::new());
        assert!(matches!(end, PumpEnd::Eof));
        assert_eq!(dst.len(), CHUNK_BYTES * 3 + 5);
    }

    #[test]
    fn pump_stops_when_cancelled() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut src: &[u8] = &[1u8; 64];
        let mut dst = Vec::new();
        assert!(matches!(
            pump(&mut src, &mut dst, &cancel),
            PumpEnd::Cancelled
        ));
        assert!(dst.is_empty());
    }
}
