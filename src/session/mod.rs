//! Recording session management
//!
//! This module provides the [`Recorder`] that walks a register note by note:
//! - Session configuration and its validation
//! - The countdown / record / advance cycle
//! - Output path layout per project, register and microphone position
//! - State snapshots for remote controls and other observers

mod config;
mod engine;
mod layout;
mod notify;
mod snapshot;
mod stats;

pub use config::{
    validate_name, ConfigError, EngineTimings, ProjectLayout, ProjectSetup, SessionConfig,
    SettingsUpdate,
};
pub use engine::Recorder;
pub use layout::{ensure_dir, position_label};
pub use notify::{NotificationSink, Notifier};
pub use snapshot::{Phase, SessionSnapshot, SettingsView};
pub use stats::SessionStats;
