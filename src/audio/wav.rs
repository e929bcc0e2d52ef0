use anyhow::{Context, Result};
use hound::{WavReader, WavWriter};
use std::path::Path;
use tracing::{debug, info};

use super::backend::{BitDepth, CaptureFormat};

/// Write interleaved integer PCM as a WAV file at the format's bit depth
pub fn write_wav(path: impl AsRef<Path>, samples: &[i32], format: CaptureFormat) -> Result<()> {
    let path = path.as_ref();

    let spec = hound::WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: format.bit_depth.bits(),
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create WAV file: {:?}", path))?;

    match format.bit_depth {
        BitDepth::Sixteen => {
            for &sample in samples {
                writer
                    .write_sample(sample.clamp(i16::MIN as i32, i16::MAX as i32) as i16)
                    .context("Failed to write sample to WAV")?;
            }
        }
        BitDepth::TwentyFour => {
            for &sample in samples {
                writer
                    .write_sample(sample)
                    .context("Failed to write sample to WAV")?;
            }
        }
    }

    writer.finalize().context("Failed to finalize WAV file")?;

    debug!(
        "Wrote {} ({} samples, {}-bit)",
        path.display(),
        samples.len(),
        format.bit_depth.bits()
    );

    Ok(())
}

/// A WAV file read back into memory
pub struct WavFile {
    pub path: String,
    pub duration_seconds: f64,
    pub format: CaptureFormat,
    pub samples: Vec<i32>,
}

impl WavFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        let bit_depth = BitDepth::try_from(spec.bits_per_sample)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("Unsupported WAV file: {:?}", path))?;

        let samples: Vec<i32> = reader
            .into_samples::<i32>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audio samples")?;

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            format: CaptureFormat {
                sample_rate: spec.sample_rate,
                channels: spec.channels,
                bit_depth,
            },
            samples,
        })
    }

    /// Number of frames (samples per channel)
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.format.channels.max(1) as usize
    }

    /// Samples reduced to 16-bit, as needed by the MP3 encoder
    pub fn samples_i16(&self) -> Vec<i16> {
        let shift = self.format.bit_depth.bits() - 16;
        self.samples.iter().map(|&s| (s >> shift) as i16).collect()
    }
}
