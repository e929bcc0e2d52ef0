//! Input level metering.
//!
//! The meter looks at the most recent window of a take, normalizes by the
//! bit depth's full scale and applies a fixed display gain so ordinary organ
//! pipes land in the visible part of a bar graph.

use super::backend::BitDepth;

/// Frames considered by the rolling RMS
pub const LEVEL_WINDOW_FRAMES: usize = 1024;

/// Display gain applied to the RMS before clamping
pub const LEVEL_GAIN: f64 = 3.0;

/// RMS of `samples` normalized to [0, 1] for the given bit depth
pub fn rms(samples: &[i32], bit_depth: BitDepth) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }

    let scale = bit_depth.full_scale();
    let sum_squared: f64 = samples
        .iter()
        .map(|&s| {
            let x = s as f64 / scale;
            x * x
        })
        .sum();

    (sum_squared / samples.len() as f64).sqrt()
}

/// Display level of the tail of a take buffer
///
/// Uses the last [`LEVEL_WINDOW_FRAMES`] frames, or the whole buffer if it is
/// shorter.
pub fn display_level(buffer: &[i32], channels: u16, bit_depth: BitDepth) -> f32 {
    let window = LEVEL_WINDOW_FRAMES * channels.max(1) as usize;
    let start = buffer.len().saturating_sub(window);
    (rms(&buffer[start..], bit_depth) * LEVEL_GAIN).min(1.0) as f32
}
