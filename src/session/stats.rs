use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counters over the lifetime of a recorder
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    /// When the most recent recording cycle was started
    pub cycle_started_at: Option<DateTime<Utc>>,

    /// Takes whose audio reached the encoder
    pub takes_completed: u32,

    /// Takes abandoned because no device delivered audio
    pub takes_failed: u32,

    /// Files written in the compressed format
    pub files_encoded: u32,

    /// Takes kept as WAV because compression failed
    pub files_uncompressed: u32,

    /// Takes lost because nothing could be written
    pub write_failures: u32,
}
