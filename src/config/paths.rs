//! Cross-platform application paths using the `dirs` crate.
//!
//! Config dir (settings):
//!   Windows: %APPDATA%\live-voice\
//!   macOS:   ~/Library/Application Support/live-voice/
//!   Linux:   ~/.config/live-voice/

use std::path::PathBuf;

/// Resolved application paths.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Directory holding `settings.toml`.
    pub config_dir: PathBuf,
    /// Full path to `settings.toml`.
    pub settings_file: PathBuf,
}

impl AppPaths {
    const APP_NAME: &'static str = "live-voice";

    /// Falls back to the current directory if the platform cannot provide a
    /// config dir.
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);
        let settings_file = config_dir.join("settings.toml");

        Self {
            config_dir,
            settings_file,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}
