use super::load::{default_config_path, default_log_path, resolve_config_path};
use super::schema::*;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn env_lock() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|e| e.into_inner())
}

struct EnvGuard {
    key: &'static str,
    old: Option<std::ffi::OsString>,
}

impl EnvGuard {
    fn set(key: &'static str, val: &str) -> Self {
        let old = std::env::var_os(key);
        unsafe {
            std::env::set_var(key, val);
        }
        Self { key, old }
    }

    fn remove(key: &'static str) -> Self {
        let old = std::env::var_os(key);
        unsafe {
            std::env::remove_var(key);
        }
        Self { key, old }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        match self.old.take() {
            Some(v) => unsafe {
                std::env::set_var(self.key, v);
            },
            None => unsafe {
                std::env::remove_var(self.key);
            },
        }
    }
}

#[test]
fn resolve_config_path_prefers_ostinato_config_path() {
    let _lock = env_lock();
    let _g1 = EnvGuard::set("OSTINATO_CONFIG_PATH", "/tmp/ostinato-test-config.toml");
    assert_eq!(
        resolve_config_path().unwrap(),
        PathBuf::from("/tmp/ostinato-test-config.toml")
    );
}

#[test]
fn default_config_path_prefers_xdg_config_home() {
    let _lock = env_lock();
    let _g1 = EnvGuard::set("XDG_CONFIG_HOME", "/tmp/xdg-config-home");
    let _g2 = EnvGuard::set("HOME", "/tmp/home-should-not-win");

    assert_eq!(
        default_config_path().unwrap(),
        PathBuf::from("/tmp/xdg-config-home")
            .join("ostinato")
            .join("config.toml")
    );
}

#[test]
fn default_config_path_falls_back_to_home_dot_config() {
    let _lock = env_lock();
    let _g1 = EnvGuard::remove("XDG_CONFIG_HOME");
    let _g2 = EnvGuard::set("HOME", "/tmp/home-dir");

    assert_eq!(
        default_config_path().unwrap(),
        PathBuf::from("/tmp/home-dir")
            .join(".config")
            .join("ostinato")
            .join("config.toml")
    );
}

#[test]
fn default_log_path_uses_xdg_state_home_then_local_state() {
    let _lock = env_lock();
    {
        let _g1 = EnvGuard::set("XDG_STATE_HOME", "/tmp/xdg-state");
        assert_eq!(
            default_log_path().unwrap(),
            PathBuf::from("/tmp/xdg-state/ostinato/ostinato.log")
        );
    }
    let _g1 = EnvGuard::remove("XDG_STATE_HOME");
    let _g2 = EnvGuard::set("HOME", "/tmp/home-dir");
    assert_eq!(
        default_log_path().unwrap(),
        PathBuf::from("/tmp/home-dir/.local/state/ostinato/ostinato.log")
    );
}

#[test]
fn defaults_match_the_player_contract() {
    let s = Settings::default();
    assert_eq!(s.playback.progress_interval_ms, 100);
    assert_eq!(s.decoder.shutdown_grace_ms, 500);
    assert_eq!(s.decoder.probe_timeout_ms, 5000);
    assert_eq!(s.decoder.ffmpeg_path, PathBuf::from("ffmpeg"));
    assert_eq!(s.library.extensions.len(), 10);
    assert!(s.library.extensions.iter().any(|e| e == "alac"));
    assert!(s.validate().is_ok());
}

#[test]
fn validate_rejects_zero_interval_timeout_and_empty_extensions() {
    let mut s = Settings::default();
    s.playback.progress_interval_ms = 0;
    assert!(s.validate().is_err());

    let mut s = Settings::default();
    s.decoder.probe_timeout_ms = 0;
    assert!(s.validate().is_err());

    let mut s = Settings::default();
    s.library.extensions = vec![" . ".to_string(), String::new()];
    assert!(s.validate().is_err());
}

#[test]
fn settings_load_from_config_file() {
    let _lock = env_lock();

    let dir = tempfile::tempdir().unwrap();
    let cfg_path = dir.path().join("config.toml");
    std::fs::write(
        &cfg_path,
        r#"
[decoder]
ffmpeg_path = "/opt/ffmpeg/bin/ffmpeg"
ffprobe_path = "/opt/ffmpeg/bin/ffprobe"
shutdown_grace_ms = 250
probe_timeout_ms = 1500

[playback]
progress_interval_ms = 50
device_release_grace_ms = 0

[library]
extensions = ["mp3"]
recursive = false
include_hidden = false
follow_links = false

[ui]
header_text = "hello"

[log]
file = "/tmp/ostinato-test.log"
filter = "ostinato=debug"
"#,
    )
    .unwrap();

    let _g1 = EnvGuard::set("OSTINATO_CONFIG_PATH", cfg_path.to_str().unwrap());
    let _g2 = EnvGuard::remove("OSTINATO__PLAYBACK__PROGRESS_INTERVAL_MS");

    let s = Settings::load().unwrap();
    assert_eq!(s.decoder.ffmpeg_path, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
    assert_eq!(s.decoder.ffprobe_path, PathBuf::from("/opt/ffmpeg/bin/ffprobe"));
    assert_eq!(s.decoder.shutdown_grace_ms, 250);
    assert_eq!(s.decoder.probe_timeout_ms, 1500);
    assert_eq!(s.playback.progress_interval_ms, 50);
    assert_eq!(s.playback.device_release_grace_ms, 0);
    assert_eq!(s.library.extensions, vec!["mp3".to_string()]);
    assert!(!s.library.recursive);
    assert!(!s.library.include_hidden);
    assert!(!s.library.follow_links);
    assert_eq!(s.ui.header_text, "hello");
    assert_eq!(s.log.file, Some(PathBuf::from("/tmp/ostinato-test.log")));
    assert_eq!(s.log.filter.as_deref(), Some("ostinato=debug"));
}

#[test]
fn settings_env_overrides_config_file() {
    let _lock = env_lock();

    let dir = tempfile::tempdir().unwrap();
    let cfg_path = dir.path().join("config.toml");
    std::fs::write(
        &cfg_path,
        r#"
[playback]
progress_interval_ms = 250
"#,
    )
    .unwrap();

    let _g1 = EnvGuard::set("OSTINATO_CONFIG_PATH", cfg_path.to_str().unwrap());
    let _g2 = EnvGuard::set("OSTINATO__PLAYBACK__PROGRESS_INTERVAL_MS", "40");

    let s = Settings::load().unwrap();
    assert_eq!(s.playback.progress_interval_ms, 40);
}

#[test]
fn missing_config_file_falls_back_to_defaults() {
    let _lock = env_lock();
    let dir = tempfile::tempdir().unwrap();
    let _g1 = EnvGuard::set(
        "OSTINATO_CONFIG_PATH",
        dir.path().join("absent.toml").to_str().unwrap(),
    );

    let s = Settings::load().unwrap();
    assert_eq!(s.playback.progress_interval_ms, 100);
    assert_eq!(s.ui.header_text, UiSettings::default().header_text);
}
