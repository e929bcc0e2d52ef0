use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use super::layout::position_label;
use crate::audio::{BitDepth, CaptureFormat, DeviceRef};

/// Rejections of boundary calls; session state is left untouched
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("invalid note range: start {start} is above end {end}")]
    InvalidRange { start: u8, end: u8 },

    #[error("invalid {field} {name:?}: {reason}")]
    InvalidName {
        field: &'static str,
        name: String,
        reason: &'static str,
    },

    #[error("failed to create {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where takes of the current register go
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectLayout {
    /// Storage root holding all projects
    pub output_root: PathBuf,
    /// Project (instrument) name
    pub project: String,
    /// Optional keyboard/division level (e.g. "Hoofdwerk")
    pub keyboard: Option<String>,
    /// Register (stop) name
    pub register: String,
    /// Recorded with the tremulant engaged
    pub tremulant: bool,
}

impl Default for ProjectLayout {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("recordings"),
            project: String::new(),
            keyboard: None,
            register: String::new(),
            tremulant: false,
        }
    }
}

/// Everything a take depends on
///
/// Read by the recording cycle at the start of each take; changes made while
/// a take is running apply from the next one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub format: CaptureFormat,
    /// Target bitrate of the compressed files
    pub bitrate_kbps: u32,
    pub countdown_seconds: u32,
    pub take_seconds: u32,
    pub start_note: u8,
    pub end_note: u8,
    /// Selected input devices; empty means the platform default
    pub devices: Vec<DeviceRef>,
    pub layout: ProjectLayout,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            format: CaptureFormat::default(),
            bitrate_kbps: 192,
            countdown_seconds: 5,
            take_seconds: 5,
            start_note: 36, // C2
            end_note: 96,   // C7
            devices: Vec::new(),
            layout: ProjectLayout::default(),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(8_000..=192_000).contains(&self.format.sample_rate) {
            return Err(invalid("sample_rate", format!("{} Hz is out of range", self.format.sample_rate)));
        }
        if !(1..=2).contains(&self.format.channels) {
            return Err(invalid("channels", format!("{} (expected 1 or 2)", self.format.channels)));
        }
        if !(8..=320).contains(&self.bitrate_kbps) {
            return Err(invalid("mp3_bitrate", format!("{} kbps is out of range", self.bitrate_kbps)));
        }
        if self.countdown_seconds < 1 {
            return Err(invalid("countdown_seconds", "must be at least 1".to_string()));
        }
        if self.take_seconds < 1 {
            return Err(invalid("record_seconds", "must be at least 1".to_string()));
        }
        if self.end_note > 127 {
            return Err(invalid("end_note", format!("{} is not a MIDI note", self.end_note)));
        }
        if self.start_note > self.end_note {
            return Err(ConfigError::InvalidRange {
                start: self.start_note,
                end: self.end_note,
            });
        }

        let mut seen = HashSet::new();
        let mut labels = HashSet::new();
        for (slot, device) in self.devices.iter().enumerate() {
            if device.id.trim().is_empty() {
                return Err(ConfigError::MissingField("devices[].id"));
            }
            if !seen.insert(device.id.as_str()) {
                return Err(invalid("devices", format!("{:?} is selected twice", device.id)));
            }
            if let Some(position) = &device.position {
                validate_name("device position", position)?;
            }
            let label = position_label(device, slot);
            if !labels.insert(label.clone()) {
                return Err(invalid("devices", format!("position {:?} is used twice", label)));
            }
        }

        Ok(())
    }

    /// Copy of this configuration with `update` applied and validated
    pub fn apply(&self, update: &SettingsUpdate) -> Result<SessionConfig, ConfigError> {
        let mut next = self.clone();

        if let Some(rate) = update.sample_rate {
            next.format.sample_rate = rate;
        }
        if let Some(bits) = update.bit_depth {
            next.format.bit_depth = BitDepth::try_from(bits)
                .map_err(|reason| ConfigError::InvalidValue { field: "bit_depth", reason })?;
        }
        if let Some(channels) = update.channels {
            next.format.channels = channels;
        }
        if let Some(bitrate) = update.mp3_bitrate {
            next.bitrate_kbps = bitrate;
        }
        if let Some(seconds) = update.countdown_seconds {
            next.countdown_seconds = seconds;
        }
        if let Some(seconds) = update.record_seconds {
            next.take_seconds = seconds;
        }
        if let Some(note) = update.start_note {
            next.start_note = midi_note("start_note", note)?;
        }
        if let Some(note) = update.end_note {
            next.end_note = midi_note("end_note", note)?;
        }
        if let Some(devices) = &update.devices {
            next.devices = devices.clone();
        }

        next.validate()?;
        Ok(next)
    }
}

fn invalid(field: &'static str, reason: String) -> ConfigError {
    ConfigError::InvalidValue { field, reason }
}

fn midi_note(field: &'static str, note: i32) -> Result<u8, ConfigError> {
    u8::try_from(note)
        .ok()
        .filter(|n| *n <= 127)
        .ok_or_else(|| invalid(field, format!("{} is not a MIDI note", note)))
}

/// Reject names that would escape or collapse the directory layout
pub fn validate_name(field: &'static str, name: &str) -> Result<(), ConfigError> {
    let reason = if name.trim().is_empty() {
        Some("must not be empty")
    } else if name.contains(|c: char| c == '/' || c == '\\') {
        Some("must not contain path separators")
    } else if name == "." || name == ".." {
        Some("must not be a relative path component")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(ConfigError::InvalidName {
            field,
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Partial settings change; absent fields keep their value
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    pub sample_rate: Option<u32>,
    pub bit_depth: Option<u16>,
    pub channels: Option<u16>,
    #[serde(alias = "bitrate_kbps")]
    pub mp3_bitrate: Option<u32>,
    pub countdown_seconds: Option<u32>,
    #[serde(alias = "take_seconds")]
    pub record_seconds: Option<u32>,
    pub start_note: Option<i32>,
    pub end_note: Option<i32>,
    pub devices: Option<Vec<DeviceRef>>,
}

/// Project selection from a setup call
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectSetup {
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub register: String,
    #[serde(default)]
    pub keyboard: Option<String>,
    #[serde(default)]
    pub tremulant: bool,
    #[serde(default, alias = "output_dir")]
    pub output_root: Option<PathBuf>,
}

impl ProjectSetup {
    pub fn new(project: impl Into<String>, register: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            register: register.into(),
            ..Default::default()
        }
    }

    /// Layout this setup describes, keeping `current`'s root when none is given
    pub fn to_layout(&self, current: &ProjectLayout) -> Result<ProjectLayout, ConfigError> {
        if self.project.trim().is_empty() {
            return Err(ConfigError::MissingField("project"));
        }
        if self.register.trim().is_empty() {
            return Err(ConfigError::MissingField("register"));
        }
        validate_name("project", &self.project)?;
        validate_name("register", &self.register)?;

        let keyboard = self
            .keyboard
            .as_ref()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(str::to_string);
        if let Some(keyboard) = &keyboard {
            validate_name("keyboard", keyboard)?;
        }

        Ok(ProjectLayout {
            output_root: self
                .output_root
                .clone()
                .unwrap_or_else(|| current.output_root.clone()),
            project: self.project.trim().to_string(),
            keyboard,
            register: self.register.trim().to_string(),
            tremulant: self.tremulant,
        })
    }
}

/// Wall-clock pacing of the recording cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineTimings {
    /// Length of one countdown step and of one second of take
    pub tick: Duration,
    /// Level publication and cancellation polling period
    pub poll_interval: Duration,
    /// Pause between a finished take and the next countdown
    pub settle: Duration,
}

impl Default for EngineTimings {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            poll_interval: Duration::from_millis(50),
            settle: Duration::from_millis(500),
        }
    }
}
