use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::config::SessionConfig;
use super::stats::SessionStats;
use crate::audio::DeviceRef;
use crate::notes::NoteInfo;

/// Where the recording cycle is
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Idle,
    Countdown,
    Recording,
    Paused,
}

/// Settings as shown to remote controls
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingsView {
    pub sample_rate: u32,
    pub bit_depth: u16,
    pub channels: u16,
    pub mp3_bitrate: u32,
    pub countdown_seconds: u32,
    pub record_seconds: u32,
    pub start_note: u8,
    pub end_note: u8,
    pub devices: Vec<DeviceRef>,
}

impl From<&SessionConfig> for SettingsView {
    fn from(config: &SessionConfig) -> Self {
        Self {
            sample_rate: config.format.sample_rate,
            bit_depth: config.format.bit_depth.bits(),
            channels: config.format.channels,
            mp3_bitrate: config.bitrate_kbps,
            countdown_seconds: config.countdown_seconds,
            record_seconds: config.take_seconds,
            start_note: config.start_note,
            end_note: config.end_note,
            devices: config.devices.clone(),
        }
    }
}

/// Immutable, consistent copy of the session state
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub phase: Phase,
    /// A recording cycle is active
    pub is_running: bool,
    pub auto_advance: bool,
    pub project: String,
    pub keyboard: Option<String>,
    pub register: String,
    pub tremulant: bool,
    /// Register directory takes are written to
    pub output_dir: PathBuf,
    /// Remaining countdown seconds; 0 outside the countdown
    pub countdown: u32,
    pub note: NoteInfo,
    pub progress: f64,
    /// Level of the primary device in [0, 1]
    pub level: f32,
    /// Level of every live device, keyed by device id
    pub levels: BTreeMap<String, f32>,
    pub settings: SettingsView,
    pub stats: SessionStats,
    pub updated_at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn current_note(&self) -> u8 {
        self.note.current_midi
    }
}
