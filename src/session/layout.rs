//! On-disk placement of takes.
//!
//! `{root}/{project}/[{keyboard}/]{register}[_trem][/{position}]/{NNN}-{pc}.{ext}`

use std::path::{Path, PathBuf};

use super::config::ProjectLayout;
use crate::audio::DeviceRef;
use crate::notes::file_stem;

impl ProjectLayout {
    /// Directory of the current register
    pub fn register_dir(&self) -> PathBuf {
        let mut dir = self.output_root.join(&self.project);
        if let Some(keyboard) = &self.keyboard {
            dir.push(keyboard);
        }
        if self.tremulant {
            dir.push(format!("{}_trem", self.register));
        } else {
            dir.push(&self.register);
        }
        dir
    }

    /// Directory of a take, optionally split per microphone position
    pub fn take_dir(&self, position: Option<&str>) -> PathBuf {
        let dir = self.register_dir();
        match position {
            Some(position) => dir.join(position),
            None => dir,
        }
    }

    /// Full path of a take file
    pub fn take_path(&self, note: u8, position: Option<&str>, extension: &str) -> PathBuf {
        self.take_dir(position)
            .join(format!("{}.{}", file_stem(note as i32), extension))
    }
}

/// Subdirectory name of a device in multi-device takes
///
/// Uses the assigned position, or `mic{n}` from the device's place in the
/// selection.
pub fn position_label(device: &DeviceRef, slot: usize) -> String {
    device
        .position
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("mic{}", slot + 1))
}

/// Create a directory and its parents; existing directories are fine
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)
}
