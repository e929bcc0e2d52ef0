//! Compression of finished takes.
//!
//! A take is first written as a WAV next to its destination. The preferred
//! [`TranscodeStage`] turns it into the compressed file; if that fails the
//! fallback stage gets a turn. When both fail the WAV stays on disk so the
//! take is not lost, and the outcome says so.

pub mod embedded;
pub mod lame;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::audio::{write_wav, CaptureFormat};

pub use embedded::EmbeddedLame;
pub use lame::LameCommand;

/// Raw take handed to an encoder
#[derive(Debug, Clone, Copy)]
pub struct EncodeRequest<'a> {
    /// Interleaved PCM at the format's bit depth
    pub samples: &'a [i32],
    pub format: CaptureFormat,
    pub bitrate_kbps: u32,
    /// Final compressed file path
    pub destination: &'a Path,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeOutcome {
    /// The compressed file exists at `path`
    Compressed { path: PathBuf, stage: String },
    /// Compression failed; the uncompressed intermediate was kept at `path`
    KeptUncompressed { path: PathBuf },
}

/// Turns raw PCM into a file on disk
#[async_trait::async_trait]
pub trait Encoder: Send + Sync {
    /// Extension of produced files, without the dot
    fn extension(&self) -> &str;

    /// Encode a take
    ///
    /// An `Err` means nothing usable was written.
    async fn encode(&self, request: &EncodeRequest<'_>) -> Result<EncodeOutcome>;
}

/// One way of converting a WAV file into a compressed file
#[async_trait::async_trait]
pub trait TranscodeStage: Send + Sync {
    fn name(&self) -> &str;

    async fn transcode(&self, wav: &Path, output: &Path, bitrate_kbps: u32) -> Result<()>;
}

/// MP3 encoder with the external `lame` tool first and the embedded
/// library as fallback
pub struct Mp3Encoder {
    primary: Box<dyn TranscodeStage>,
    fallback: Box<dyn TranscodeStage>,
}

impl Mp3Encoder {
    pub fn new(lame_path: impl Into<PathBuf>) -> Self {
        Self::with_stages(
            Box::new(LameCommand::new(lame_path)),
            Box::new(EmbeddedLame::new()),
        )
    }

    pub fn with_stages(primary: Box<dyn TranscodeStage>, fallback: Box<dyn TranscodeStage>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait::async_trait]
impl Encoder for Mp3Encoder {
    fn extension(&self) -> &str {
        "mp3"
    }

    async fn encode(&self, request: &EncodeRequest<'_>) -> Result<EncodeOutcome> {
        let destination = request.destination;
        let wav_path = destination.with_extension("wav");

        write_wav_off_runtime(&wav_path, request.samples, request.format)
            .await
            .with_context(|| format!("Failed to write intermediate {}", wav_path.display()))?;

        for stage in [&self.primary, &self.fallback] {
            match stage
                .transcode(&wav_path, destination, request.bitrate_kbps)
                .await
            {
                Ok(()) => {
                    if let Err(e) = tokio::fs::remove_file(&wav_path).await {
                        warn!("Failed to remove {}: {}", wav_path.display(), e);
                    }
                    info!("Saved {} ({})", destination.display(), stage.name());
                    return Ok(EncodeOutcome::Compressed {
                        path: destination.to_path_buf(),
                        stage: stage.name().to_string(),
                    });
                }
                Err(e) => {
                    warn!("{} could not encode {}: {:#}", stage.name(), wav_path.display(), e);
                    remove_partial(destination).await;
                }
            }
        }

        error!("MP3 conversion failed, keeping WAV: {}", wav_path.display());

        Ok(EncodeOutcome::KeptUncompressed { path: wav_path })
    }
}

/// Write a WAV on the blocking pool
async fn write_wav_off_runtime(path: &Path, samples: &[i32], format: CaptureFormat) -> Result<()> {
    let path = path.to_path_buf();
    let samples = samples.to_vec();

    tokio::task::spawn_blocking(move || write_wav(&path, &samples, format))
        .await
        .context("WAV writer task panicked")?
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial {}: {}", path.display(), e),
    }
}

/// Writes takes as plain WAV files
///
/// Used when no compression is wanted, and as a stand-in encoder in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct WavEncoder;

#[async_trait::async_trait]
impl Encoder for WavEncoder {
    fn extension(&self) -> &str {
        "wav"
    }

    async fn encode(&self, request: &EncodeRequest<'_>) -> Result<EncodeOutcome> {
        write_wav_off_runtime(request.destination, request.samples, request.format).await?;
        Ok(EncodeOutcome::Compressed {
            path: request.destination.to_path_buf(),
            stage: "wav".to_string(),
        })
    }
}
