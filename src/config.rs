use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::audio::{BitDepth, CaptureFormat};
use crate::session::{ConfigError, EngineTimings, ProjectLayout, SessionConfig};

/// Environment variables override the file, e.g. `ORGAN_SAMPLER__SERVICE__HTTP__PORT`
const ENV_PREFIX: &str = "ORGAN_SAMPLER";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub recording: RecordingConfig,
    pub encoder: EncoderConfig,
    pub timing: TimingConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "organ-sampler".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 5555,
        }
    }
}

/// Initial session settings; remote controls can change them at runtime
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub output_dir: PathBuf,
    pub sample_rate: u32,
    pub bit_depth: u16,
    pub channels: u16,
    pub mp3_bitrate: u32,
    pub countdown_seconds: u32,
    pub record_seconds: u32,
    pub start_note: u8,
    pub end_note: u8,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("recordings"),
            sample_rate: 44100,
            bit_depth: 16,
            channels: 1,
            mp3_bitrate: 192,
            countdown_seconds: 5,
            record_seconds: 5,
            start_note: 36,
            end_note: 96,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// External MP3 encoder, tried before the built-in one
    pub lame_path: PathBuf,
    /// Write MP3 files; when off, takes are stored as WAV
    pub compress: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            lame_path: PathBuf::from("lame"),
            compress: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub tick_ms: u64,
    pub poll_ms: u64,
    pub settle_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            poll_ms: 50,
            settle_ms: 500,
        }
    }
}

impl Config {
    /// Load `path` (any extension the `config` crate knows; optional) plus
    /// environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("Failed to read configuration {}", path))?;

        Ok(settings.try_deserialize()?)
    }

    /// Session configuration the recorder starts with
    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        let recording = &self.recording;
        let bit_depth = BitDepth::try_from(recording.bit_depth)
            .map_err(|reason| ConfigError::InvalidValue {
                field: "bit_depth",
                reason,
            })?;

        let config = SessionConfig {
            format: CaptureFormat {
                sample_rate: recording.sample_rate,
                channels: recording.channels,
                bit_depth,
            },
            bitrate_kbps: recording.mp3_bitrate,
            countdown_seconds: recording.countdown_seconds,
            take_seconds: recording.record_seconds,
            start_note: recording.start_note,
            end_note: recording.end_note,
            devices: Vec::new(),
            layout: ProjectLayout {
                output_root: recording.output_dir.clone(),
                ..ProjectLayout::default()
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn timings(&self) -> EngineTimings {
        EngineTimings {
            tick: Duration::from_millis(self.timing.tick_ms.max(1)),
            poll_interval: Duration::from_millis(self.timing.poll_ms.max(1)),
            settle: Duration::from_millis(self.timing.settle_ms),
        }
    }
}
