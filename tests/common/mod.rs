// Shared fixtures for integration tests: a synthetic audio host that plays a
// tone per device, an encoder that records what it was asked to write, and
// helpers to drive a recorder with shortened timings.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use organ_sampler::audio::{AudioBackend, AudioFrame, AudioHost, CaptureFormat, DeviceInfo, DeviceRef};
use organ_sampler::encoder::{EncodeOutcome, EncodeRequest, Encoder, WavEncoder};
use organ_sampler::session::{EngineTimings, ProjectLayout, Recorder, SessionConfig, SessionSnapshot};
use organ_sampler::BitDepth;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const SAMPLE_RATE: u32 = 8000;
const BLOCK_FRAMES: usize = 256;

pub fn fast_timings() -> EngineTimings {
    EngineTimings {
        tick: Duration::from_millis(20),
        poll_interval: Duration::from_millis(5),
        settle: Duration::from_millis(5),
    }
}

pub fn test_config(root: &Path) -> SessionConfig {
    SessionConfig {
        format: CaptureFormat {
            sample_rate: SAMPLE_RATE,
            channels: 1,
            bit_depth: BitDepth::Sixteen,
        },
        bitrate_kbps: 128,
        countdown_seconds: 1,
        take_seconds: 1,
        start_note: 60,
        end_note: 62,
        devices: Vec::new(),
        layout: ProjectLayout {
            output_root: root.to_path_buf(),
            ..ProjectLayout::default()
        },
    }
}

/// Audio host whose devices generate a sine tone
#[derive(Default)]
pub struct SyntheticHost {
    failing: HashSet<String>,
    faulting: HashMap<String, usize>,
    active: Arc<AtomicUsize>,
    opened: Arc<AtomicUsize>,
}

impl SyntheticHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// `device` fails to open
    pub fn failing(mut self, device: &str) -> Self {
        self.failing.insert(device.to_string());
        self
    }

    /// `device`'s stream dies after delivering `blocks` blocks
    pub fn faulting(mut self, device: &str, blocks: usize) -> Self {
        self.faulting.insert(device.to_string(), blocks);
        self
    }

    /// Streams currently open
    pub fn active_streams(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Streams successfully opened so far
    pub fn opened_streams(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl AudioHost for SyntheticHost {
    fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(["synth-a", "synth-b", "synth-c"]
            .iter()
            .enumerate()
            .map(|(i, id)| DeviceInfo {
                id: id.to_string(),
                name: format!("Synthetic {}", id),
                channels: 2,
                sample_rate: SAMPLE_RATE,
                is_default: i == 0,
            })
            .collect())
    }

    fn create_backend(
        &self,
        device: Option<&DeviceRef>,
        format: CaptureFormat,
    ) -> Result<Box<dyn AudioBackend>> {
        let id = device.map(|d| d.id.clone()).unwrap_or_else(|| "default".to_string());
        Ok(Box::new(SyntheticBackend {
            fail_open: self.failing.contains(&id),
            fault_after: self.faulting.get(&id).copied(),
            label: id,
            format,
            active: Arc::clone(&self.active),
            opened: Arc::clone(&self.opened),
            cancel: None,
            task: None,
        }))
    }
}

struct SyntheticBackend {
    label: String,
    format: CaptureFormat,
    fail_open: bool,
    fault_after: Option<usize>,
    active: Arc<AtomicUsize>,
    opened: Arc<AtomicUsize>,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl AudioBackend for SyntheticBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.fail_open {
            bail!("device {} is unplugged", self.label);
        }

        let (tx, rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let format = self.format;
        let fault_after = self.fault_after;
        let active = Arc::clone(&self.active);
        let stop = cancel.clone();

        self.active.fetch_add(1, Ordering::SeqCst);
        self.opened.fetch_add(1, Ordering::SeqCst);

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(1));
            let mut blocks = 0usize;
            let mut position = 0usize;

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if fault_after.is_some_and(|limit| blocks >= limit) {
                    break;
                }

                let mut samples = Vec::with_capacity(BLOCK_FRAMES * format.channels as usize);
                for _ in 0..BLOCK_FRAMES {
                    let t = position as f32 / format.sample_rate as f32;
                    let value = format.bit_depth.quantize(0.5 * (2.0 * std::f32::consts::PI * 440.0 * t).sin());
                    for _ in 0..format.channels {
                        samples.push(value);
                    }
                    position += 1;
                }

                let frame = AudioFrame {
                    samples,
                    sample_rate: format.sample_rate,
                    channels: format.channels,
                    timestamp_ms: (position as u64 * 1000) / format.sample_rate as u64,
                };
                if tx.try_send(frame).is_err() && tx.is_closed() {
                    break;
                }
                blocks += 1;
            }

            active.fetch_sub(1, Ordering::SeqCst);
        }));
        self.cancel = Some(cancel);

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = self.task.take() {
            task.await?;
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn name(&self) -> &str {
        &self.label
    }
}

/// Writes WAV files and remembers every destination
#[derive(Default)]
pub struct RecordingEncoder {
    written: Mutex<Vec<PathBuf>>,
    started: AtomicUsize,
    delay: Duration,
}

impl RecordingEncoder {
    /// Waits `delay` before writing, like a slow external encoder
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn written(&self) -> Vec<PathBuf> {
        self.written.lock().unwrap().clone()
    }

    /// Encodes begun so far, finished or not
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Encoder for RecordingEncoder {
    fn extension(&self) -> &str {
        "wav"
    }

    async fn encode(&self, request: &EncodeRequest<'_>) -> Result<EncodeOutcome> {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let outcome = WavEncoder.encode(request).await?;
        self.written
            .lock()
            .unwrap()
            .push(request.destination.to_path_buf());
        Ok(outcome)
    }
}

pub struct Harness {
    pub recorder: Recorder,
    pub host: Arc<SyntheticHost>,
    pub encoder: Arc<RecordingEncoder>,
}

impl Harness {
    pub fn new(host: SyntheticHost, config: SessionConfig) -> Result<Self> {
        Self::with(host, config, RecordingEncoder::default(), fast_timings())
    }

    pub fn with(
        host: SyntheticHost,
        config: SessionConfig,
        encoder: RecordingEncoder,
        timings: EngineTimings,
    ) -> Result<Self> {
        let host = Arc::new(host);
        let encoder = Arc::new(encoder);
        let recorder = Recorder::new(config, host.clone(), encoder.clone(), timings)?;
        Ok(Self {
            recorder,
            host,
            encoder,
        })
    }
}

/// Poll the recorder until `done` holds
pub async fn wait_for(
    recorder: &Recorder,
    what: &str,
    done: impl Fn(&SessionSnapshot) -> bool,
) -> Result<SessionSnapshot> {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let snapshot = recorder.snapshot().await;
        if done(&snapshot) {
            return Ok(snapshot);
        }
        if Instant::now() > deadline {
            bail!("timed out waiting for {} (phase {:?})", what, snapshot.phase);
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// The cycle has ended and released the session
pub fn cycle_over(snapshot: &SessionSnapshot) -> bool {
    !snapshot.is_running
}

/// WAV files below `dir`, relative and sorted
pub fn files_under(dir: &Path) -> Vec<PathBuf> {
    fn walk(base: &Path, dir: &Path, out: &mut Vec<PathBuf>) {
        let Ok(entries) = std::fs::read_dir(dir) else { return };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                walk(base, &path, out);
            } else if let Ok(relative) = path.strip_prefix(base) {
                out.push(relative.to_path_buf());
            }
        }
    }

    let mut files = Vec::new();
    walk(dir, dir, &mut files);
    files.sort();
    files
}
