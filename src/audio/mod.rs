pub mod backend;
pub mod capture;
pub mod cpal_host;
pub mod level;
pub mod wav;

pub use backend::{AudioBackend, AudioFrame, AudioHost, BitDepth, CaptureFormat, DeviceInfo, DeviceRef};
pub use capture::{
    CaptureError, CaptureRequest, CaptureSession, DeviceTake, LevelObserver, LevelReport, TakeOutcome,
};
pub use cpal_host::CpalHost;
pub use wav::{write_wav, WavFile};
