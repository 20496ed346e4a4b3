use std::path::PathBuf;
use std::time::Duration;

/// A playable file discovered on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub path: PathBuf,
    /// File basename, shown in the track list.
    pub name: String,
    /// Probed length; `None` until a session probes it.
    pub duration: Option<Duration>,
}

impl Track {
    pub fn new(path: PathBuf) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            name,
            duration: None,
        }
    }
}
