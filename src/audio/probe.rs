//! Track duration lookup through an external metadata query.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::warn;

use super::error::ProbeError;

/// Metadata-only duration query. Never streams audio.
pub trait DurationProbe: Send + Sync {
    fn probe(&self, path: &Path) -> Result<Duration, ProbeError>;
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const WAIT_POLL: Duration = Duration::from_millis(10);

/// `ffprobe -show_format` as a `DurationProbe`.
///
/// A query that outlives its timeout is killed and reported as
/// `ProbeError::Timeout`.
#[derive(Debug, Clone)]
pub struct Ffprobe {
    program: PathBuf,
    timeout: Duration,
}

impl Ffprobe {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for Ffprobe {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

impl DurationProbe for Ffprobe {
    fn probe(&self, path: &Path) -> Result<Duration, ProbeError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["-v", "quiet", "-print_format", "json", "-show_format"])
            .arg(path);
        let output = output_within(cmd, self.timeout)?;

        if !output.status.success() {
            return Err(ProbeError::Failed {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_probe_output(&output.stdout)
    }
}

/// Like `Command::output`, but kills the child once `timeout` elapses.
fn output_within(mut cmd: Command, timeout: Duration) -> Result<Output, ProbeError> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(ProbeError::Spawn)?;

    // Drained on their own threads so a chatty child never blocks on a full pipe.
    let stdout = child.stdout.take().map(|s| thread::spawn(move || read_all(s)));
    let stderr = child.stderr.take().map(|s| thread::spawn(move || read_all(s)));

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait().map_err(ProbeError::Wait)? {
            Some(status) => break status,
            None if Instant::now() >= deadline => {
                warn!(pid = child.id(), ?timeout, "probe timed out, killing");
                let _ = child.kill();
                let _ = child.wait();
                // Readers are left to finish on their own.
                return Err(ProbeError::Timeout(timeout));
            }
            None => thread::sleep(WAIT_POLL),
        }
    };

    let collect = |h: Option<thread::JoinHandle<Vec<u8>>>| {
        h.and_then(|h| h.join().ok()).unwrap_or_default()
    };
    Ok(Output {
        status,
        stdout: collect(stdout),
        stderr: collect(stderr),
    })
}

fn read_all(mut src: impl Read) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = src.read_to_end(&mut buf);
    buf
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: Option<ProbeFormat>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    // ffprobe reports numbers as JSON strings.
    #[serde(default)]
    duration: Option<String>,
}

/// Extract `format.duration` (seconds) from ffprobe's JSON output.
///
/// Fractional seconds are truncated.
pub fn parse_probe_output(json: &[u8]) -> Result<Duration, ProbeError> {
    let parsed: ProbeOutput = serde_json::from_slice(json)?;
    let raw = parsed
        .format
        .and_then(|f| f.duration)
        .ok_or(ProbeError::MissingDuration)?;

    let secs: f64 = raw
        .trim()
        .parse()
        .map_err(|_| ProbeError::InvalidDuration(raw.clone()))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(ProbeError::InvalidDuration(raw));
    }

    Ok(Duration::from_secs(secs.trunc() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_duration_string_and_truncates() {
        let json = br#"{"format": {"filename": "a.flac", "duration": "185.726000"}}"#;
        assert_eq!(parse_probe_output(json).unwrap(), Duration::from_secs(185));
    }

    #[test]
    fn missing_format_or_duration_is_an_error() {
        assert!(matches!(
            parse_probe_output(br#"{}"#),
            Err(ProbeError::MissingDuration)
        ));
        assert!(matches!(
            parse_probe_output(br#"{"format": {"filename": "a.mp3"}}"#),
            Err(ProbeError::MissingDuration)
        ));
    }

    #[test]
    fn garbage_output_is_a_json_error() {
        assert!(matches!(
            parse_probe_output(b"not json at all"),
            Err(ProbeError::Json(_))
        ));
    }

    #[test]
    fn non_numeric_or_negative_duration_is_rejected() {
        assert!(matches!(
            parse_probe_output(br#"{"format": {"duration": "N/A"}}"#),
            Err(ProbeError::InvalidDuration(_))
        ));
        assert!(matches!(
            parse_probe_output(br#"{"format": {"duration": "-3.0"}}"#),
            Err(ProbeError::InvalidDuration(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn slow_query_is_killed_after_timeout() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "exec sleep 5"]);
        let started = Instant::now();
        let res = output_within(cmd, Duration::from_millis(100));
        assert!(matches!(res, Err(ProbeError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[cfg(unix)]
    #[test]
    fn fast_query_output_is_collected() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "printf '{\"format\":{\"duration\":\"65.5\"}}'; echo warn >&2"]);
        let out = output_within(cmd, Duration::from_secs(5)).unwrap();
        assert!(out.status.success());
        assert_eq!(out.stderr, b"warn\n");
        assert_eq!(parse_probe_output(&out.stdout).unwrap(), Duration::from_secs(65));
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let probe = Ffprobe::new("/nonexistent/ffprobe-for-tests");
        assert!(matches!(
            probe.probe(Path::new("/tmp/a.mp3")),
            Err(ProbeError::Spawn(_))
        ));
    }
}
