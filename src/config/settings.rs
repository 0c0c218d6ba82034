//! Settings file model: service endpoint, voice, devices, retry and timing.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::session::InteractionMode;

/// Environment variable consulted when `session.api_key` is unset.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

// ---------------------------------------------------------------------------
// Voice
// ---------------------------------------------------------------------------

/// Prebuilt synthesized voice used for the service's spoken output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Voice {
    #[default]
    Puck,
    Charon,
    Kore,
    Fenrir,
    Aoede,
}

impl Voice {
    pub const ALL: [Voice; 5] = [
        Voice::Puck,
        Voice::Charon,
        Voice::Kore,
        Voice::Fenrir,
        Voice::Aoede,
    ];

    /// Name as the service expects it.
    pub fn as_str(self) -> &'static str {
        match self {
            Voice::Puck => "Puck",
            Voice::Charon => "Charon",
            Voice::Kore => "Kore",
            Voice::Fenrir => "Fenrir",
            Voice::Aoede => "Aoede",
        }
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Voice {
    type Err = String;

    /// Case-insensitive.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Voice::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown voice '{s}'"))
    }
}

// ---------------------------------------------------------------------------
// VoiceSettings
// ---------------------------------------------------------------------------

/// User preferences read when a session is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VoiceSettings {
    pub voice: Voice,
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Remote service connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Websocket endpoint of the live API.
    pub endpoint: String,
    /// Model identifier sent in the setup frame.
    pub model: String,
    /// API key; `None` falls back to `GEMINI_API_KEY`.
    pub api_key: Option<String>,
    /// Interaction mode used when the app connects on startup.
    pub default_mode: InteractionMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://generativelanguage.googleapis.com/ws/\
                google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent"
                .into(),
            model: "models/gemini-2.0-flash-exp".into(),
            api_key: None,
            default_mode: InteractionMode::default(),
        }
    }
}

impl SessionConfig {
    /// Configured key, else the environment variable.  Empty strings count
    /// as unset.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|k| !k.trim().is_empty())
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Capture and playback device settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Samples per encoded capture window.
    pub capture_buffer_size: usize,
    /// Input device name; `None` means the system default.
    pub input_device: Option<String>,
    /// Output device name; `None` means the system default.
    pub output_device: Option<String>,
    /// Lookahead applied when playback restarts after a stall.
    pub playback_lookahead_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_buffer_size: 4096,
            input_device: None,
            output_device: None,
            playback_lookahead_ms: 10,
        }
    }
}

impl AudioConfig {
    pub fn playback_lookahead(&self) -> Duration {
        Duration::from_millis(self.playback_lookahead_ms)
    }
}

// ---------------------------------------------------------------------------
// RetryConfig
// ---------------------------------------------------------------------------

/// Reconnect policy after an unexpected close or failed open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Reconnect attempts before giving up.
    pub max_retries: u32,
    /// Linear backoff step: attempt `n` (0-based) waits `step × (n + 1)`.
    pub backoff_step_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_step_ms: 1000,
        }
    }
}

// ---------------------------------------------------------------------------
// TimingConfig
// ---------------------------------------------------------------------------

/// Settling delays used by the session manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Delay between open and the greeting signal.
    pub greeting_delay_ms: u64,
    /// Pause between teardown and reconnect when switching modes.
    pub mode_switch_settle_ms: u64,
    /// Upper bound on waiting for the transport to close.
    pub close_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            greeting_delay_ms: 100,
            mode_switch_settle_ms: 500,
            close_timeout_ms: 2000,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Everything the client reads from `settings.toml`.
///
/// Missing sections and fields fall back to their defaults, so a file written
/// by an older build keeps loading.
///
/// ```rust,no_run
/// use live_voice::config::{AppConfig, Voice};
///
/// # fn main() -> anyhow::Result<()> {
/// let mut config = AppConfig::load()?;
/// config.voice.voice = Voice::Kore;
/// config.save()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Remote service settings.
    pub session: SessionConfig,
    /// Persisted user preferences.
    pub voice: VoiceSettings,
    /// Audio device settings.
    pub audio: AudioConfig,
    /// Reconnect policy.
    pub retry: RetryConfig,
    /// Lifecycle delays.
    pub timing: TimingConfig,
}

impl AppConfig {
    /// Read the per-user settings file; a first run yields the defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("no settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// Write the per-user settings file, creating its directory on demand.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)
            .with_context(|| format!("writing {}", path.display()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
