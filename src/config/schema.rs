use std::path::PathBuf;

use serde::Deserialize;

/// Top-level application settings loaded from `config.toml`.
///
/// File format: TOML
/// Default path (Linux/XDG): `$XDG_CONFIG_HOME/ostinato/config.toml` or `~/.config/ostinato/config.toml`
///
/// Precedence (highest wins):
/// 1) Environment variables (prefix `OSTINATO__`, `__` as nested separator)
/// 2) Config file (if present)
/// 3) Struct defaults
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub decoder: DecoderSettings,
    pub playback: PlaybackSettings,
    pub library: LibrarySettings,
    pub ui: UiSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DecoderSettings {
    /// Program used to decode tracks into raw PCM.
    pub ffmpeg_path: PathBuf,
    /// Program used to query track durations.
    pub ffprobe_path: PathBuf,
    /// How long stopping waits for the decoder before killing it (milliseconds).
    pub shutdown_grace_ms: u64,
    /// Upper bound on a duration query before it is killed (milliseconds).
    pub probe_timeout_ms: u64,
}

impl Default for DecoderSettings {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            shutdown_grace_ms: 500,
            probe_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    /// Progress sampling cadence (milliseconds).
    pub progress_interval_ms: u64,
    /// Pause between releasing the previous player and opening the next
    /// one (milliseconds). Absorbs driver release latency.
    pub device_release_grace_ms: u64,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            progress_interval_ms: 100,
            device_release_grace_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LibrarySettings {
    /// File extensions to treat as audio (case-insensitive, without dot).
    pub extensions: Vec<String>,
    /// Whether to follow symlinks during scanning.
    pub follow_links: bool,
    /// Whether to include hidden files/directories (dotfiles).
    pub include_hidden: bool,
    /// Whether to recurse into subdirectories.
    pub recursive: bool,
    /// Optional cap on directory recursion depth.
    pub max_depth: Option<usize>,
}

impl Default for LibrarySettings {
    fn default() -> Self {
        Self {
            extensions: [
                "mp3", "wav", "flac", "aac", "ogg", "wma", "m4a", "alac", "aiff", "pcm",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            follow_links: true,
            include_hidden: true,
            recursive: true,
            max_depth: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UiSettings {
    /// The text rendered inside the top header box.
    pub header_text: String,
}

impl Default for UiSettings {
    fn default() -> Self {
        Self {
            header_text: " ~ ostinato ~ ".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Log file. Defaults to `$XDG_STATE_HOME/ostinato/ostinato.log`.
    pub file: Option<PathBuf>,
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    pub filter: Option<String>,
}
