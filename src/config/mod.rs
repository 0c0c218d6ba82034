//! Configuration module.
//!
//! Provides `AppConfig` (top-level settings), sub-configs for each subsystem,
//! `AppPaths` for the platform config directory, and TOML persistence via
//! `AppConfig::load` / `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{
    AppConfig, AudioConfig, RetryConfig, SessionConfig, TimingConfig, Voice, VoiceSettings,
    API_KEY_ENV,
};
