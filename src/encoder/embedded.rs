// In-process MP3 encoding through the LAME library bindings.
//
// LAME takes 16-bit input here, so 24-bit takes are reduced before encoding.
// The external tool reads the WAV itself and keeps the full resolution.

use anyhow::{anyhow, bail, Context, Result};
use mp3lame_encoder::{Bitrate, Builder, FlushNoGap, InterleavedPcm, MonoPcm, Quality};
use std::path::{Path, PathBuf};

use super::TranscodeStage;
use crate::audio::WavFile;

/// Highest supported constant bitrate not above the request
fn nearest_bitrate(kbps: u32) -> Bitrate {
    match kbps {
        0..=15 => Bitrate::Kbps8,
        16..=23 => Bitrate::Kbps16,
        24..=31 => Bitrate::Kbps24,
        32..=39 => Bitrate::Kbps32,
        40..=47 => Bitrate::Kbps40,
        48..=63 => Bitrate::Kbps48,
        64..=79 => Bitrate::Kbps64,
        80..=95 => Bitrate::Kbps80,
        96..=111 => Bitrate::Kbps96,
        112..=127 => Bitrate::Kbps112,
        128..=159 => Bitrate::Kbps128,
        160..=191 => Bitrate::Kbps160,
        192..=223 => Bitrate::Kbps192,
        224..=255 => Bitrate::Kbps224,
        256..=319 => Bitrate::Kbps256,
        _ => Bitrate::Kbps320,
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EmbeddedLame;

impl EmbeddedLame {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl TranscodeStage for EmbeddedLame {
    fn name(&self) -> &str {
        "embedded lame"
    }

    async fn transcode(&self, wav: &Path, output: &Path, bitrate_kbps: u32) -> Result<()> {
        let wav: PathBuf = wav.to_path_buf();
        let output: PathBuf = output.to_path_buf();

        tokio::task::spawn_blocking(move || encode_file(&wav, &output, bitrate_kbps))
            .await
            .context("MP3 encoder task panicked")?
    }
}

fn encode_file(wav: &Path, output: &Path, bitrate_kbps: u32) -> Result<()> {
    let audio = WavFile::open(wav)?;
    let channels = audio.format.channels;
    if !(1..=2).contains(&channels) {
        bail!("Cannot encode {} channels to MP3", channels);
    }

    let mut builder = Builder::new().ok_or_else(|| anyhow!("Failed to create LAME encoder"))?;
    builder
        .set_num_channels(channels as u8)
        .map_err(|e| anyhow!("Failed to set channel count: {:?}", e))?;
    builder
        .set_sample_rate(audio.format.sample_rate)
        .map_err(|e| anyhow!("Failed to set sample rate: {:?}", e))?;
    builder
        .set_brate(nearest_bitrate(bitrate_kbps))
        .map_err(|e| anyhow!("Failed to set bitrate: {:?}", e))?;
    builder
        .set_quality(Quality::Best)
        .map_err(|e| anyhow!("Failed to set quality: {:?}", e))?;
    let mut encoder = builder
        .build()
        .map_err(|e| anyhow!("Failed to initialize LAME: {:?}", e))?;

    let pcm = audio.samples_i16();
    let mut mp3 = Vec::new();
    mp3.reserve(mp3lame_encoder::max_required_buffer_size(audio.frame_count()));

    if channels == 1 {
        encoder.encode_to_vec(MonoPcm(&pcm), &mut mp3)
    } else {
        encoder.encode_to_vec(InterleavedPcm(&pcm), &mut mp3)
    }
    .map_err(|e| anyhow!("Failed to encode MP3: {:?}", e))?;

    mp3.reserve(7200);
    encoder
        .flush_to_vec::<FlushNoGap>(&mut mp3)
        .map_err(|e| anyhow!("Failed to flush MP3 encoder: {:?}", e))?;

    std::fs::write(output, &mp3)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    Ok(())
}
