use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Sample width of a take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum BitDepth {
    Sixteen,
    TwentyFour,
}

impl BitDepth {
    pub fn bits(self) -> u16 {
        match self {
            BitDepth::Sixteen => 16,
            BitDepth::TwentyFour => 24,
        }
    }

    /// Magnitude of a full-scale sample, used to normalize into [-1, 1]
    pub fn full_scale(self) -> f64 {
        match self {
            BitDepth::Sixteen => 32768.0,
            BitDepth::TwentyFour => 8_388_608.0,
        }
    }

    /// Convert a normalized float sample to an integer at this depth
    pub fn quantize(self, sample: f32) -> i32 {
        let max = self.full_scale() - 1.0;
        (sample as f64 * self.full_scale()).round().clamp(-max - 1.0, max) as i32
    }
}

impl TryFrom<u16> for BitDepth {
    type Error = String;

    fn try_from(bits: u16) -> std::result::Result<Self, Self::Error> {
        match bits {
            16 => Ok(BitDepth::Sixteen),
            24 => Ok(BitDepth::TwentyFour),
            other => Err(format!("unsupported bit depth {other} (expected 16 or 24)")),
        }
    }
}

impl From<BitDepth> for u16 {
    fn from(depth: BitDepth) -> u16 {
        depth.bits()
    }
}

/// PCM format requested from every device of a take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels (1 = mono, 2 = stereo)
    pub channels: u16,
    /// Integer sample width
    pub bit_depth: BitDepth,
}

impl Default for CaptureFormat {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 1,
            bit_depth: BitDepth::Sixteen,
        }
    }
}

impl CaptureFormat {
    /// Frames in a take of `seconds` length
    pub fn frames_for(&self, seconds: u32) -> usize {
        self.sample_rate as usize * seconds as usize
    }
}

/// Block of captured audio (integer PCM at the take's bit depth, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw samples scaled to the bit depth's full-scale range
    pub samples: Vec<i32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since the stream started
    pub timestamp_ms: u64,
}

/// A device selected for recording
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceRef {
    /// Host identifier of the input device
    pub id: String,
    /// Human-assigned microphone position (e.g. "front", "rear")
    #[serde(default)]
    pub position: Option<String>,
}

impl DeviceRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            position: None,
        }
    }

    pub fn with_position(mut self, position: impl Into<String>) -> Self {
        self.position = Some(position.into());
        self
    }
}

/// Input device as reported by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub channels: u16,
    pub sample_rate: u32,
    pub is_default: bool,
}

/// Audio capture backend trait
///
/// One backend owns one open input stream for the duration of a take.
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive audio frames. The sender
    /// side is dropped when the stream stops or faults.
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing audio and release the device
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Source of input devices
///
/// The hardware implementation is [`super::cpal_host::CpalHost`]; tests plug in
/// synthetic hosts.
pub trait AudioHost: Send + Sync {
    /// List available input devices
    fn list_devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Create a backend for `device`, or for the platform default when `None`
    fn create_backend(
        &self,
        device: Option<&DeviceRef>,
        format: CaptureFormat,
    ) -> Result<Box<dyn AudioBackend>>;
}
