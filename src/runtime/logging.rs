use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::config::{LogSettings, default_log_path};

const DEFAULT_FILTER: &str = "ostinato=info";

/// Install the global tracing subscriber writing to a log file.
///
/// The terminal is owned by the TUI, so nothing is written to stderr.
/// Returns the path actually used.
pub fn init(settings: &LogSettings) -> std::io::Result<PathBuf> {
    let path = settings
        .file
        .clone()
        .or_else(default_log_path)
        .unwrap_or_else(fallback_path);

    let (file, path) = match open_log(&path) {
        Ok(f) => (f, path),
        Err(_) => {
            let tmp = fallback_path();
            (open_log(&tmp)?, tmp)
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        settings
            .filter
            .as_deref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
    });

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(true)
        .try_init();

    Ok(path)
}

fn open_log(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn fallback_path() -> PathBuf {
    std::env::temp_dir().join("ostinato.log")
}
