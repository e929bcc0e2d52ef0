use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use super::TranscodeStage;

/// Runs the `lame` command-line encoder
pub struct LameCommand {
    program: PathBuf,
}

impl LameCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait::async_trait]
impl TranscodeStage for LameCommand {
    fn name(&self) -> &str {
        "lame"
    }

    async fn transcode(&self, wav: &Path, output: &Path, bitrate_kbps: u32) -> Result<()> {
        debug!(
            "Running {} -b {} on {}",
            self.program.display(),
            bitrate_kbps,
            wav.display()
        );

        let result = Command::new(&self.program)
            .arg("-b")
            .arg(bitrate_kbps.to_string())
            .arg("--quiet")
            .arg(wav)
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.program.display()))?;

        if !result.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.program.display(),
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            );
        }

        Ok(())
    }
}
