pub mod audio;
pub mod config;
pub mod encoder;
pub mod http;
pub mod notes;
pub mod session;

pub use audio::{
    AudioBackend, AudioFrame, AudioHost, BitDepth, CaptureFormat, CpalHost, DeviceInfo, DeviceRef,
};
pub use config::Config;
pub use encoder::{EncodeOutcome, EncodeRequest, Encoder, Mp3Encoder, WavEncoder};
pub use http::{create_router, AppState};
pub use notes::NoteInfo;
pub use session::{
    ConfigError, EngineTimings, NotificationSink, Phase, ProjectSetup, Recorder, SessionConfig,
    SessionSnapshot, SessionStats, SettingsUpdate,
};
