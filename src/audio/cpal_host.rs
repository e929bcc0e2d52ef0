// Hardware input via cpal
//
// cpal streams are not Send on every platform, so each stream is opened,
// played and dropped on a dedicated OS thread. The thread forwards samples
// through a bounded tokio channel and parks on a control channel until the
// take ends or the driver reports an error.

use anyhow::{anyhow, bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Sample;
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::backend::{AudioBackend, AudioFrame, AudioHost, BitDepth, CaptureFormat, DeviceInfo, DeviceRef};

/// Frames buffered between the driver callback and the capture task
const FRAME_CHANNEL_CAPACITY: usize = 1024;

/// How long a device gets to come up before the open counts as failed
const STREAM_START_TIMEOUT: Duration = Duration::from_secs(3);

/// `AudioHost` backed by the platform's default cpal host
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalHost;

impl CpalHost {
    pub fn new() -> Self {
        Self
    }
}

impl AudioHost for CpalHost {
    fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        let host = cpal::default_host();
        let default_name = host.default_input_device().and_then(|d| d.name().ok());

        let mut devices = Vec::new();
        for device in host
            .input_devices()
            .context("Failed to enumerate input devices")?
        {
            let name = match device.name() {
                Ok(name) => name,
                Err(e) => {
                    warn!("Skipping input device without a name: {}", e);
                    continue;
                }
            };

            let config = match device.default_input_config() {
                Ok(config) => config,
                Err(e) => {
                    debug!("Skipping {}: no default input config ({})", name, e);
                    continue;
                }
            };

            devices.push(DeviceInfo {
                id: name.clone(),
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                channels: config.channels(),
                sample_rate: config.sample_rate().0,
            });
        }

        Ok(devices)
    }

    fn create_backend(
        &self,
        device: Option<&DeviceRef>,
        format: CaptureFormat,
    ) -> Result<Box<dyn AudioBackend>> {
        Ok(Box::new(CpalBackend::new(
            device.map(|d| d.id.clone()),
            format,
        )))
    }
}

enum StreamSignal {
    Stop,
    Fault(String),
}

/// One cpal input stream
pub struct CpalBackend {
    device_id: Option<String>,
    format: CaptureFormat,
    label: String,
    control_tx: Option<std_mpsc::Sender<StreamSignal>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalBackend {
    pub fn new(device_id: Option<String>, format: CaptureFormat) -> Self {
        let label = device_id
            .clone()
            .unwrap_or_else(|| "default input".to_string());

        Self {
            device_id,
            format,
            label,
            control_tx: None,
            thread: None,
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for CpalBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.is_capturing() {
            bail!("Already capturing");
        }

        info!(
            "Opening {} ({}Hz, {} channels, {}-bit)",
            self.label,
            self.format.sample_rate,
            self.format.channels,
            self.format.bit_depth.bits()
        );

        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let (control_tx, control_rx) = std_mpsc::channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let device_id = self.device_id.clone();
        let format = self.format;
        let fault_tx = control_tx.clone();

        let thread = std::thread::Builder::new()
            .name(format!("capture-{}", self.label))
            .spawn(move || run_stream(device_id, format, frame_tx, fault_tx, control_rx, ready_tx))
            .context("Failed to spawn capture thread")?;

        let ready = tokio::time::timeout(STREAM_START_TIMEOUT, ready_rx).await;
        match ready {
            Ok(Ok(Ok(()))) => {
                self.control_tx = Some(control_tx);
                self.thread = Some(thread);
                Ok(frame_rx)
            }
            Ok(Ok(Err(e))) => {
                join_thread(thread).await;
                Err(e.context(format!("Failed to open {}", self.label)))
            }
            Ok(Err(_)) => {
                join_thread(thread).await;
                Err(anyhow!("Capture thread for {} exited during startup", self.label))
            }
            Err(_) => {
                // The thread may still finish opening; tell it to let go.
                let _ = control_tx.send(StreamSignal::Stop);
                Err(anyhow!("Timed out opening {}", self.label))
            }
        }
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(control_tx) = self.control_tx.take() else {
            return Ok(());
        };

        debug!("Stopping capture on {}", self.label);

        // A send error means the thread already exited after a fault.
        let _ = control_tx.send(StreamSignal::Stop);

        if let Some(thread) = self.thread.take() {
            join_thread(thread).await;
        }

        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.control_tx.is_some()
    }

    fn name(&self) -> &str {
        &self.label
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        if let Some(control_tx) = self.control_tx.take() {
            let _ = control_tx.send(StreamSignal::Stop);
        }
    }
}

async fn join_thread(thread: JoinHandle<()>) {
    match tokio::task::spawn_blocking(move || thread.join()).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => error!("Capture thread panicked"),
        Err(e) => error!("Failed to join capture thread: {}", e),
    }
}

fn run_stream(
    device_id: Option<String>,
    format: CaptureFormat,
    frame_tx: mpsc::Sender<AudioFrame>,
    fault_tx: std_mpsc::Sender<StreamSignal>,
    control_rx: std_mpsc::Receiver<StreamSignal>,
    ready_tx: oneshot::Sender<Result<()>>,
) {
    let stream = match open_stream(device_id.as_deref(), format, frame_tx, fault_tx) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if ready_tx.send(Ok(())).is_err() {
        // Caller gave up waiting.
        return;
    }

    match control_rx.recv() {
        Ok(StreamSignal::Stop) | Err(_) => {}
        Ok(StreamSignal::Fault(reason)) => {
            error!(
                "Input stream on {} failed: {}",
                device_id.as_deref().unwrap_or("default input"),
                reason
            );
        }
    }

    // Dropping the stream drops the data callback and with it the frame
    // sender, which closes the receiver on the async side.
    drop(stream);
}

fn find_device(host: &cpal::Host, device_id: Option<&str>) -> Result<cpal::Device> {
    match device_id {
        None => host
            .default_input_device()
            .ok_or_else(|| anyhow!("No default input device available")),
        Some(id) => host
            .input_devices()
            .context("Failed to enumerate input devices")?
            .find(|d| d.name().map(|n| n == id).unwrap_or(false))
            .ok_or_else(|| anyhow!("Input device not found: {}", id)),
    }
}

fn open_stream(
    device_id: Option<&str>,
    format: CaptureFormat,
    frame_tx: mpsc::Sender<AudioFrame>,
    fault_tx: std_mpsc::Sender<StreamSignal>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = find_device(&host, device_id)?;

    let supported = device
        .default_input_config()
        .context("Failed to query default input config")?;

    let config = cpal::StreamConfig {
        channels: format.channels,
        sample_rate: cpal::SampleRate(format.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let err_fn = move |err: cpal::StreamError| {
        let _ = fault_tx.send(StreamSignal::Fault(err.to_string()));
    };

    let bit_depth = format.bit_depth;
    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => {
            build_input_stream::<f32>(&device, &config, bit_depth, frame_tx, err_fn)?
        }
        cpal::SampleFormat::I16 => {
            build_input_stream::<i16>(&device, &config, bit_depth, frame_tx, err_fn)?
        }
        cpal::SampleFormat::U16 => {
            build_input_stream::<u16>(&device, &config, bit_depth, frame_tx, err_fn)?
        }
        cpal::SampleFormat::I32 => {
            build_input_stream::<i32>(&device, &config, bit_depth, frame_tx, err_fn)?
        }
        other => bail!("Unsupported sample format: {}", other),
    };

    stream.play().context("Failed to start input stream")?;

    Ok(stream)
}

fn build_input_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    bit_depth: BitDepth,
    frame_tx: mpsc::Sender<AudioFrame>,
    err_fn: impl FnMut(cpal::StreamError) + Send + 'static,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    let sample_rate = config.sample_rate.0;
    let channels = config.channels;
    let started = Instant::now();

    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let samples = data
                    .iter()
                    .map(|s| bit_depth.quantize(s.to_sample::<f32>()))
                    .collect();

                let frame = AudioFrame {
                    samples,
                    sample_rate,
                    channels,
                    timestamp_ms: started.elapsed().as_millis() as u64,
                };

                // Non-blocking: the driver thread must never wait on us.
                if let Err(e) = frame_tx.try_send(frame) {
                    warn!("Dropped input block: {}", e);
                }
            },
            err_fn,
            None,
        )
        .context("Failed to build input stream")?;

    Ok(stream)
}
