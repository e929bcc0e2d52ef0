//! Capture of a single take.
//!
//! A [`CaptureSession`] opens one [`AudioBackend`] per selected device (or the
//! platform default when none is selected), drains each stream into its own
//! buffer on a dedicated task, and reports per-device levels at a fixed poll
//! interval until the take duration elapses or the cycle is cancelled. Every
//! opened stream is stopped and drained before `run` returns, on all paths.
//!
//! With two or more devices a device that fails to open, or whose stream dies
//! mid-take, is dropped from the take; the take only fails when no device is
//! left. With zero or one device any such failure fails the take.

use futures::future::join_all;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backend::{AudioBackend, AudioFrame, AudioHost, CaptureFormat, DeviceRef};
use super::level::display_level;

/// Key used for the platform default input in level maps
pub const DEFAULT_DEVICE_KEY: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("failed to open {device}: {reason}")]
    DeviceOpen { device: String, reason: String },

    #[error("no input device could be opened")]
    NoDeviceOpened,

    #[error("input stream on {device} stopped mid-take")]
    StreamFault { device: String },
}

/// Parameters of one take
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub format: CaptureFormat,
    pub devices: Vec<DeviceRef>,
    /// Nominal length; decides the frame count of every output
    pub take_seconds: u32,
    /// Wall-clock time to keep the streams open
    pub duration: Duration,
    /// Level publication and fault polling period
    pub poll_interval: Duration,
}

impl CaptureRequest {
    pub fn target_frames(&self) -> usize {
        self.format.frames_for(self.take_seconds)
    }

    pub fn target_samples(&self) -> usize {
        self.target_frames() * self.format.channels as usize
    }

    pub fn is_multi_device(&self) -> bool {
        self.devices.len() >= 2
    }
}

/// Audio of one device for one take, exactly `target_frames` long
#[derive(Debug, Clone)]
pub struct DeviceTake {
    /// Index of the device in the selection (stable across failures)
    pub slot: usize,
    pub device: Option<DeviceRef>,
    pub samples: Vec<i32>,
    /// Frames actually delivered by the device before trimming or padding
    pub captured_frames: usize,
}

impl DeviceTake {
    pub fn frame_count(&self, channels: u16) -> usize {
        self.samples.len() / channels.max(1) as usize
    }
}

#[derive(Debug)]
pub enum TakeOutcome {
    Completed(Vec<DeviceTake>),
    Cancelled,
    Failed(CaptureError),
}

/// Levels of the live devices, in selection order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LevelReport {
    pub levels: Vec<(String, f32)>,
}

impl LevelReport {
    /// Level of the first live device
    pub fn primary(&self) -> f32 {
        self.levels.first().map(|(_, level)| *level).unwrap_or(0.0)
    }
}

/// Receives level updates while a take is running
#[async_trait::async_trait]
pub trait LevelObserver: Send + Sync {
    async fn on_levels(&self, report: &LevelReport);
}

/// Observer that ignores every report
pub struct NoopObserver;

#[async_trait::async_trait]
impl LevelObserver for NoopObserver {
    async fn on_levels(&self, _report: &LevelReport) {}
}

/// Key a device is reported under
pub fn device_key(device: Option<&DeviceRef>) -> String {
    device
        .map(|d| d.id.clone())
        .unwrap_or_else(|| DEFAULT_DEVICE_KEY.to_string())
}

/// Trim or zero-pad interleaved samples to exactly `target` samples
pub fn fit_to_length(mut samples: Vec<i32>, target: usize) -> Vec<i32> {
    samples.resize(target, 0);
    samples
}

/// One open stream plus the task draining it
struct DeviceCapture {
    slot: usize,
    device: Option<DeviceRef>,
    key: String,
    backend: Box<dyn AudioBackend>,
    level: Arc<AtomicU32>,
    received: Arc<AtomicUsize>,
    drain: JoinHandle<Vec<i32>>,
}

impl DeviceCapture {
    async fn open(
        host: &dyn AudioHost,
        slot: usize,
        device: Option<DeviceRef>,
        format: CaptureFormat,
        target_samples: usize,
    ) -> anyhow::Result<Self> {
        let mut backend = host.create_backend(device.as_ref(), format)?;
        let frames = backend.start().await?;

        let level = Arc::new(AtomicU32::new(0));
        let received = Arc::new(AtomicUsize::new(0));
        let drain = tokio::spawn(drain_frames(
            frames,
            format,
            target_samples,
            Arc::clone(&level),
            Arc::clone(&received),
        ));

        let key = device_key(device.as_ref());
        debug!("Capturing slot {} from {} ({})", slot, key, backend.name());

        Ok(Self {
            slot,
            device,
            key,
            backend,
            level,
            received,
            drain,
        })
    }

    fn level(&self) -> f32 {
        f32::from_bits(self.level.load(Ordering::Relaxed))
    }

    /// The drain task only ends early when the stream dropped its sender
    fn has_faulted(&self) -> bool {
        self.drain.is_finished()
    }

    /// Stop the stream and collect what it delivered
    async fn finish(mut self) -> FinishedCapture {
        if let Err(e) = self.backend.stop().await {
            warn!("Failed to stop capture on {}: {}", self.key, e);
        }

        let samples = match self.drain.await {
            Ok(samples) => Some(samples),
            Err(e) => {
                error!("Capture task for {} panicked: {}", self.key, e);
                None
            }
        };

        FinishedCapture {
            slot: self.slot,
            device: self.device,
            key: self.key,
            samples,
            received: self.received.load(Ordering::Relaxed),
        }
    }
}

struct FinishedCapture {
    slot: usize,
    device: Option<DeviceRef>,
    key: String,
    samples: Option<Vec<i32>>,
    received: usize,
}

async fn drain_frames(
    mut frames: mpsc::Receiver<AudioFrame>,
    format: CaptureFormat,
    target_samples: usize,
    level: Arc<AtomicU32>,
    received: Arc<AtomicUsize>,
) -> Vec<i32> {
    let mut buffer = Vec::with_capacity(target_samples);

    while let Some(frame) = frames.recv().await {
        received.fetch_add(frame.samples.len(), Ordering::Relaxed);

        let room = target_samples.saturating_sub(buffer.len());
        let take = room.min(frame.samples.len());
        buffer.extend_from_slice(&frame.samples[..take]);

        // Past the target the tail of this block is the freshest signal.
        let current = if take < frame.samples.len() {
            display_level(&frame.samples, format.channels, format.bit_depth)
        } else {
            display_level(&buffer, format.channels, format.bit_depth)
        };
        level.store(current.to_bits(), Ordering::Relaxed);
    }

    buffer
}

enum Waited {
    Elapsed,
    Cancelled,
    Faulted(String),
}

/// A take in progress
pub struct CaptureSession {
    host: Arc<dyn AudioHost>,
    request: CaptureRequest,
}

impl CaptureSession {
    pub fn new(host: Arc<dyn AudioHost>, request: CaptureRequest) -> Self {
        Self { host, request }
    }

    /// Record the take
    ///
    /// Returns once every stream has been closed. Cancellation is observed
    /// within one poll interval and discards all captured audio.
    pub async fn run(self, cancel: &CancellationToken, observer: &dyn LevelObserver) -> TakeOutcome {
        let multi = self.request.is_multi_device();

        let mut captures = match self.open_all().await {
            Ok(captures) => captures,
            Err(e) => return TakeOutcome::Failed(e),
        };

        let mut dropped = Vec::new();
        let waited = self
            .wait(&mut captures, &mut dropped, multi, cancel, observer)
            .await;

        let finished = join_all(captures.into_iter().map(DeviceCapture::finish)).await;
        join_all(dropped.into_iter().map(DeviceCapture::finish)).await;

        match waited {
            Waited::Cancelled => {
                info!("Take cancelled, discarding captured audio");
                TakeOutcome::Cancelled
            }
            Waited::Faulted(device) => {
                error!("Take abandoned: input stream on {} stopped", device);
                TakeOutcome::Failed(CaptureError::StreamFault { device })
            }
            Waited::Elapsed => self.collect(finished, multi),
        }
    }

    async fn open_all(&self) -> Result<Vec<DeviceCapture>, CaptureError> {
        let format = self.request.format;
        let target_samples = self.request.target_samples();

        let slots: Vec<(usize, Option<DeviceRef>)> = if self.request.devices.is_empty() {
            vec![(0, None)]
        } else {
            self.request
                .devices
                .iter()
                .cloned()
                .enumerate()
                .map(|(slot, device)| (slot, Some(device)))
                .collect()
        };

        let host = self.host.as_ref();
        let opened = join_all(slots.into_iter().map(|(slot, device)| async move {
            let key = device_key(device.as_ref());
            let result = DeviceCapture::open(host, slot, device, format, target_samples).await;
            (key, result)
        }))
        .await;

        let mut captures = Vec::new();
        for (key, result) in opened {
            match result {
                Ok(capture) => captures.push(capture),
                Err(e) if self.request.is_multi_device() => {
                    warn!("Excluding {} from this take: {:#}", key, e);
                }
                Err(e) => {
                    error!("Failed to open {}: {:#}", key, e);
                    return Err(CaptureError::DeviceOpen {
                        device: key,
                        reason: format!("{:#}", e),
                    });
                }
            }
        }

        if captures.is_empty() {
            error!("No input device could be opened for this take");
            return Err(CaptureError::NoDeviceOpened);
        }

        info!(
            "Recording {} device(s) for {}s",
            captures.len(),
            self.request.take_seconds
        );

        Ok(captures)
    }

    async fn wait(
        &self,
        captures: &mut Vec<DeviceCapture>,
        dropped: &mut Vec<DeviceCapture>,
        multi: bool,
        cancel: &CancellationToken,
        observer: &dyn LevelObserver,
    ) -> Waited {
        let deadline = tokio::time::sleep_until(Instant::now() + self.request.duration);
        tokio::pin!(deadline);

        let mut ticker = tokio::time::interval(self.request.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Waited::Cancelled,
                _ = &mut deadline => {
                    return match Self::sweep_faults(captures, dropped, multi) {
                        Some(device) => Waited::Faulted(device),
                        None => Waited::Elapsed,
                    };
                }
                _ = ticker.tick() => {
                    if let Some(device) = Self::sweep_faults(captures, dropped, multi) {
                        return Waited::Faulted(device);
                    }
                    let report = LevelReport {
                        levels: captures.iter().map(|c| (c.key.clone(), c.level())).collect(),
                    };
                    observer.on_levels(&report).await;
                }
            }
        }
    }

    /// Move faulted streams out of the take; returns the device that sank it
    fn sweep_faults(
        captures: &mut Vec<DeviceCapture>,
        dropped: &mut Vec<DeviceCapture>,
        multi: bool,
    ) -> Option<String> {
        let mut index = 0;
        while index < captures.len() {
            if captures[index].has_faulted() {
                let capture = captures.remove(index);
                warn!("Input stream on {} stopped mid-take", capture.key);
                let key = capture.key.clone();
                dropped.push(capture);
                if !multi || captures.is_empty() {
                    return Some(key);
                }
            } else {
                index += 1;
            }
        }
        None
    }

    fn collect(&self, finished: Vec<FinishedCapture>, multi: bool) -> TakeOutcome {
        let target_samples = self.request.target_samples();
        let channels = self.request.format.channels.max(1) as usize;

        let mut takes = Vec::new();
        for capture in finished {
            let Some(samples) = capture.samples else {
                if multi {
                    continue;
                }
                return TakeOutcome::Failed(CaptureError::StreamFault {
                    device: capture.key,
                });
            };

            let captured_frames = capture.received / channels;
            if captured_frames != self.request.target_frames() {
                debug!(
                    "{} delivered {} frames, fitting to {}",
                    capture.key,
                    captured_frames,
                    self.request.target_frames()
                );
            }

            takes.push(DeviceTake {
                slot: capture.slot,
                device: capture.device,
                samples: fit_to_length(samples, target_samples),
                captured_frames,
            });
        }

        if takes.is_empty() {
            return TakeOutcome::Failed(CaptureError::NoDeviceOpened);
        }

        TakeOutcome::Completed(takes)
    }
}
