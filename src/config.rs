//! Configuration loading and management
//!
//! `Config` holds filesystem locations, `Settings` is the persisted user
//! preference file, and `SettingsHandle` is the lock-free runtime view the
//! tap thread reads on every event.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::chord::{DebounceConfig, DEFAULT_MIN_INTERVAL};
use crate::switch::SwitchMethod;

/// Environment variable forcing listen-only mode (detect, never suppress)
pub const LISTEN_ONLY_ENV: &str = "SHIFT_SPACE_SWITCHER_LISTEN_ONLY";

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Persisted user settings
    pub settings_path: PathBuf,

    /// Listen-only forced from the environment
    pub listen_only_override: bool,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("shift-space-switcher");

        let listen_only_override = std::env::var(LISTEN_ONLY_ENV)
            .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            listen_only_override,
            ..Self::with_data_dir(data_dir)
        })
    }

    /// Configuration rooted at an explicit data directory
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            socket_path: data_dir.join("daemon.sock"),
            settings_path: data_dir.join("settings.json"),
            data_dir,
            listen_only_override: false,
        }
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

/// Errors reading, writing or changing settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to access settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed settings file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("the {0} method is unavailable while switch animation is disabled")]
    MethodUnavailable(SwitchMethod),
}

/// User preferences persisted between runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Master switch; when false the tap is not installed
    pub enabled: bool,
    /// Allow repeated switches during one Shift hold
    pub multi_tap_enabled: bool,
    /// Minimum gap between switches in multi-tap mode
    pub multi_tap_interval_ms: u64,
    /// How the input source is changed
    pub method: SwitchMethod,
    /// Show the small symbol toast after each switch
    pub show_mini_hud: bool,
    /// Avoid methods that play the system switch animation
    pub disable_animation: bool,
    /// Detect the chord but never swallow keystrokes
    pub listen_only: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            multi_tap_enabled: true,
            multi_tap_interval_ms: DEFAULT_MIN_INTERVAL.as_millis() as u64,
            method: SwitchMethod::TisToggle,
            show_mini_hud: false,
            disable_animation: true,
            listen_only: false,
        }
    }
}

impl Settings {
    /// Load settings, falling back to defaults when the file does not exist
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(?path, "no settings file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Load settings, replacing an unreadable file with defaults
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            warn!(?path, error = %e, "ignoring unreadable settings file");
            Self::default()
        })
    }

    /// Write settings as pretty JSON
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Select a switch method, honoring the animation preference
    pub fn select_method(&mut self, method: SwitchMethod) -> Result<(), SettingsError> {
        if method.plays_animation() && self.disable_animation {
            return Err(SettingsError::MethodUnavailable(method));
        }
        self.method = method;
        Ok(())
    }

    /// Toggle the animation preference, moving off a method that animates
    pub fn set_disable_animation(&mut self, disable: bool) {
        self.disable_animation = disable;
        if disable && self.method.plays_animation() {
            self.method = SwitchMethod::TisToggle;
        }
    }
}

/// Shared, lock-free view of the current settings
///
/// Written by the IPC side, read by the tap thread. Reads are relaxed
/// snapshots; a change becomes visible within one event at worst.
#[derive(Debug, Clone)]
pub struct SettingsHandle {
    inner: Arc<SharedSettings>,
}

#[derive(Debug)]
struct SharedSettings {
    enabled: AtomicBool,
    multi_tap_enabled: AtomicBool,
    multi_tap_interval_ms: AtomicU64,
    method: AtomicU8,
    show_mini_hud: AtomicBool,
    disable_animation: AtomicBool,
    listen_only: AtomicBool,
}

impl SettingsHandle {
    /// Create a handle initialized from `settings`
    pub fn new(settings: &Settings) -> Self {
        let inner = SharedSettings {
            enabled: AtomicBool::new(settings.enabled),
            multi_tap_enabled: AtomicBool::new(settings.multi_tap_enabled),
            multi_tap_interval_ms: AtomicU64::new(settings.multi_tap_interval_ms),
            method: AtomicU8::new(settings.method.as_u8()),
            show_mini_hud: AtomicBool::new(settings.show_mini_hud),
            disable_animation: AtomicBool::new(settings.disable_animation),
            listen_only: AtomicBool::new(settings.listen_only),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Publish a new settings value
    pub fn apply(&self, settings: &Settings) {
        let s = &self.inner;
        s.enabled.store(settings.enabled, Ordering::Relaxed);
        s.multi_tap_enabled.store(settings.multi_tap_enabled, Ordering::Relaxed);
        s.multi_tap_interval_ms
            .store(settings.multi_tap_interval_ms, Ordering::Relaxed);
        s.method.store(settings.method.as_u8(), Ordering::Relaxed);
        s.show_mini_hud.store(settings.show_mini_hud, Ordering::Relaxed);
        s.disable_animation
            .store(settings.disable_animation, Ordering::Relaxed);
        s.listen_only.store(settings.listen_only, Ordering::Relaxed);
    }

    /// Copy out the current settings
    pub fn snapshot(&self) -> Settings {
        let s = &self.inner;
        Settings {
            enabled: s.enabled.load(Ordering::Relaxed),
            multi_tap_enabled: s.multi_tap_enabled.load(Ordering::Relaxed),
            multi_tap_interval_ms: s.multi_tap_interval_ms.load(Ordering::Relaxed),
            method: self.method(),
            show_mini_hud: s.show_mini_hud.load(Ordering::Relaxed),
            disable_animation: s.disable_animation.load(Ordering::Relaxed),
            listen_only: s.listen_only.load(Ordering::Relaxed),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Relaxed)
    }

    pub fn method(&self) -> SwitchMethod {
        SwitchMethod::from_u8(self.inner.method.load(Ordering::Relaxed))
    }

    pub fn show_mini_hud(&self) -> bool {
        self.inner.show_mini_hud.load(Ordering::Relaxed)
    }

    pub fn listen_only(&self) -> bool {
        self.inner.listen_only.load(Ordering::Relaxed)
    }

    /// Debounce policy as of now
    pub fn debounce(&self) -> DebounceConfig {
        DebounceConfig {
            multi_tap_enabled: self.inner.multi_tap_enabled.load(Ordering::Relaxed),
            minimum_interval: Duration::from_millis(
                self.inner.multi_tap_interval_ms.load(Ordering::Relaxed),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_paths() {
        let config = Config::with_data_dir(PathBuf::from("/tmp/sss"));
        assert_eq!(config.socket_path, PathBuf::from("/tmp/sss/daemon.sock"));
        assert_eq!(config.settings_path, PathBuf::from("/tmp/sss/settings.json"));
        assert!(!config.listen_only_override);
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert!(settings.enabled);
        assert!(settings.multi_tap_enabled);
        assert_eq!(settings.multi_tap_interval_ms, 90);
        assert_eq!(settings.method, SwitchMethod::TisToggle);
        assert!(settings.disable_animation);
        assert!(!settings.listen_only);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = Settings {
            multi_tap_enabled: false,
            method: SwitchMethod::CapsLock,
            show_mini_hud: true,
            ..Settings::default()
        };
        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path).unwrap(), settings);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"enabled": false, "method": "caps_lock"}"#).unwrap();
        let settings = Settings::load(&path).unwrap();
        assert!(!settings.enabled);
        assert_eq!(settings.method, SwitchMethod::CapsLock);
        assert_eq!(settings.multi_tap_interval_ms, 90);
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(matches!(Settings::load(&path), Err(SettingsError::Parse(_))));
        assert_eq!(Settings::load_or_default(&path), Settings::default());
    }

    #[test]
    fn test_shortcut_rejected_while_animation_disabled() {
        let mut settings = Settings::default();
        let err = settings.select_method(SwitchMethod::Shortcut).unwrap_err();
        assert!(matches!(err, SettingsError::MethodUnavailable(SwitchMethod::Shortcut)));
        assert_eq!(settings.method, SwitchMethod::TisToggle);

        settings.set_disable_animation(false);
        settings.select_method(SwitchMethod::Shortcut).unwrap();
        assert_eq!(settings.method, SwitchMethod::Shortcut);
    }

    #[test]
    fn test_disabling_animation_moves_off_shortcut() {
        let mut settings = Settings {
            disable_animation: false,
            method: SwitchMethod::Shortcut,
            ..Settings::default()
        };
        settings.set_disable_animation(true);
        assert_eq!(settings.method, SwitchMethod::TisToggle);
    }

    #[test]
    fn test_handle_round_trip() {
        let handle = SettingsHandle::new(&Settings::default());
        let updated = Settings {
            enabled: false,
            multi_tap_interval_ms: 150,
            method: SwitchMethod::CapsLock,
            listen_only: true,
            ..Settings::default()
        };
        handle.apply(&updated);
        assert_eq!(handle.snapshot(), updated);
        assert!(!handle.is_enabled());
        assert!(handle.listen_only());
        assert_eq!(handle.debounce().minimum_interval, Duration::from_millis(150));
    }

    #[test]
    fn test_handle_clones_share_state() {
        let handle = SettingsHandle::new(&Settings::default());
        let reader = handle.clone();
        handle.apply(&Settings {
            multi_tap_enabled: false,
            ..Settings::default()
        });
        assert!(!reader.debounce().multi_tap_enabled);
    }
}
