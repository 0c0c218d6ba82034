//! Session lifecycle: state machine, modes, retry policy and the manager task.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use live_voice::audio::{CpalMicrophone, CpalSpeaker};
//! use live_voice::config::AppConfig;
//! use live_voice::session::{InteractionMode, SessionManager, SessionOptions};
//! use live_voice::transport::GeminiTransport;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load()?;
//!     let (manager, controller, mut updates) = SessionManager::new(
//!         Arc::new(GeminiTransport::from_config(&config.session)),
//!         Arc::new(CpalMicrophone::new()),
//!         Arc::new(CpalSpeaker::open(None)?),
//!         SessionOptions::from_config(&config),
//!     );
//!     manager.spawn();
//!
//!     controller.connect(InteractionMode::Assistant, config.voice);
//!     while let Some(update) = updates.recv().await {
//!         println!("{update:?}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod manager;
pub mod mode;
pub mod retry;
pub mod state;

pub use error::SessionError;
pub use manager::{SessionCommand, SessionController, SessionManager, SessionOptions, SessionUpdate};
pub use mode::InteractionMode;
pub use retry::{RetryPolicy, RetryState};
pub use state::SessionState;
