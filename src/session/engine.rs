//! The recording state machine.
//!
//! All session state lives in one [`SessionCore`] behind a single async mutex.
//! Boundary calls and the recording cycle mutate it only while holding that
//! lock, and every mutation publishes a snapshot before the lock is released,
//! so observers see transitions in the order they happened.
//!
//! A running cycle owns a [`CancellationToken`]. `stop`, `pause` and project
//! changes cancel it while holding the lock; the cycle checks the token under
//! the same lock before each of its own mutations, so once a boundary call has
//! returned the cancelled cycle can no longer change state. An encode that was
//! already running when the token fired finishes, and its output is deleted.

use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::{ConfigError, EngineTimings, ProjectSetup, SessionConfig, SettingsUpdate};
use super::layout::{ensure_dir, position_label};
use super::notify::{NotificationSink, Notifier};
use super::snapshot::{Phase, SessionSnapshot, SettingsView};
use super::stats::SessionStats;
use crate::audio::{
    AudioHost, CaptureRequest, CaptureSession, DeviceInfo, DeviceTake, LevelObserver, LevelReport,
    TakeOutcome,
};
use crate::encoder::{EncodeOutcome, EncodeRequest, Encoder};
use crate::notes::{display_name, NoteInfo};

struct SessionCore {
    config: SessionConfig,
    phase: Phase,
    current_note: u8,
    countdown: u32,
    auto_advance: bool,
    level: f32,
    levels: BTreeMap<String, f32>,
    stats: SessionStats,
    /// Token of the active cycle; `None` when no cycle runs
    cycle: Option<CancellationToken>,
    /// Task of the most recent cycle, awaited before the next one opens devices
    task: Option<JoinHandle<()>>,
}

impl SessionCore {
    fn new(config: SessionConfig) -> Self {
        Self {
            current_note: config.start_note,
            config,
            phase: Phase::Idle,
            countdown: 0,
            auto_advance: true,
            level: 0.0,
            levels: BTreeMap::new(),
            stats: SessionStats::default(),
            cycle: None,
            task: None,
        }
    }

    fn snapshot(&self, extension: &str) -> SessionSnapshot {
        let layout = &self.config.layout;
        let note = NoteInfo::new(
            self.config.start_note,
            self.config.end_note,
            self.current_note,
            extension,
        );

        SessionSnapshot {
            phase: self.phase,
            is_running: self.cycle.is_some(),
            auto_advance: self.auto_advance,
            project: layout.project.clone(),
            keyboard: layout.keyboard.clone(),
            register: layout.register.clone(),
            tremulant: layout.tremulant,
            output_dir: layout.register_dir(),
            countdown: self.countdown,
            progress: note.progress(),
            note,
            level: self.level,
            levels: self.levels.clone(),
            settings: SettingsView::from(&self.config),
            stats: self.stats.clone(),
            updated_at: Utc::now(),
        }
    }

    fn clear_levels(&mut self) {
        self.level = 0.0;
        self.levels.clear();
    }

    /// End the active cycle, if any, and settle into `phase`
    fn halt(&mut self, phase: Phase) {
        if let Some(token) = self.cycle.take() {
            token.cancel();
        }
        self.phase = phase;
        self.countdown = 0;
        self.clear_levels();
    }

    fn clamp_note(&mut self) {
        self.current_note = self
            .current_note
            .clamp(self.config.start_note, self.config.end_note);
    }

    fn is_recording(&self) -> bool {
        self.phase == Phase::Recording
    }
}

struct Inner {
    core: Mutex<SessionCore>,
    host: Arc<dyn AudioHost>,
    encoder: Arc<dyn Encoder>,
    notifier: Notifier,
    timings: EngineTimings,
}

/// What a take records, fixed when the take starts
struct TakePlan {
    note: u8,
    config: SessionConfig,
}

enum AfterTake {
    Advance,
    Done,
}

impl Inner {
    fn publish(&self, core: &SessionCore) {
        self.notifier.publish(core.snapshot(self.encoder.extension()));
    }

    async fn update<R>(&self, f: impl FnOnce(&mut SessionCore) -> R) -> R {
        let mut core = self.core.lock().await;
        let result = f(&mut core);
        self.publish(&core);
        result
    }

    /// Apply a cycle mutation unless the cycle has been cancelled
    async fn cycle_update<R>(
        &self,
        token: &CancellationToken,
        f: impl FnOnce(&mut SessionCore) -> R,
    ) -> Option<R> {
        let mut core = self.core.lock().await;
        if token.is_cancelled() {
            return None;
        }
        let result = f(&mut core);
        self.publish(&core);
        Some(result)
    }

    /// Sleep unless cancelled first; `false` means the cycle is over
    async fn wait(&self, token: &CancellationToken, duration: Duration) -> bool {
        tokio::select! {
            _ = token.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    async fn run_cycle(self: Arc<Self>, token: CancellationToken) {
        info!("Recording cycle started");

        loop {
            let countdown = self
                .cycle_update(&token, |core| {
                    core.phase = Phase::Countdown;
                    core.countdown = core.config.countdown_seconds;
                    core.config.countdown_seconds
                })
                .await;
            let Some(countdown) = countdown else { return };

            for remaining in (0..countdown).rev() {
                if !self.wait(&token, self.timings.tick).await {
                    return;
                }
                if self
                    .cycle_update(&token, |core| core.countdown = remaining)
                    .await
                    .is_none()
                {
                    return;
                }
            }

            let plan = self
                .cycle_update(&token, |core| {
                    core.phase = Phase::Recording;
                    core.countdown = 0;
                    core.clear_levels();
                    TakePlan {
                        note: core.current_note,
                        config: core.config.clone(),
                    }
                })
                .await;
            let Some(plan) = plan else { return };

            self.record_take(&token, &plan).await;

            let next = self
                .cycle_update(&token, |core| {
                    core.clear_levels();
                    if !core.auto_advance {
                        core.halt(Phase::Paused);
                        AfterTake::Done
                    } else if core.current_note >= core.config.end_note {
                        core.halt(Phase::Idle);
                        AfterTake::Done
                    } else {
                        core.current_note += 1;
                        core.phase = Phase::Countdown;
                        core.countdown = core.config.countdown_seconds;
                        AfterTake::Advance
                    }
                })
                .await;

            match next {
                Some(AfterTake::Advance) => {
                    if !self.wait(&token, self.timings.settle).await {
                        return;
                    }
                }
                Some(AfterTake::Done) => {
                    info!("Recording cycle ended after note {}", plan.note);
                    return;
                }
                None => return,
            }
        }
    }

    async fn record_take(&self, token: &CancellationToken, plan: &TakePlan) {
        let config = &plan.config;
        info!(
            note = plan.note,
            "Recording {} ({}s)",
            display_name(plan.note as i32),
            config.take_seconds
        );

        let request = CaptureRequest {
            format: config.format,
            devices: config.devices.clone(),
            take_seconds: config.take_seconds,
            duration: self.timings.tick * config.take_seconds,
            poll_interval: self.timings.poll_interval,
        };
        let observer = LevelPublisher { inner: self, token };
        let outcome = CaptureSession::new(self.host.clone(), request)
            .run(token, &observer)
            .await;

        match outcome {
            TakeOutcome::Cancelled => {
                info!(note = plan.note, "Take discarded");
            }
            TakeOutcome::Failed(e) => {
                error!(note = plan.note, "Take failed: {}", e);
                self.cycle_update(token, |core| core.stats.takes_failed += 1)
                    .await;
            }
            TakeOutcome::Completed(takes) => {
                if self
                    .cycle_update(token, |core| core.stats.takes_completed += 1)
                    .await
                    .is_none()
                {
                    info!(note = plan.note, "Take discarded");
                    return;
                }
                let multi_device = config.devices.len() >= 2;
                for take in &takes {
                    if token.is_cancelled() {
                        info!(note = plan.note, "Cycle cancelled, remaining outputs discarded");
                        return;
                    }
                    self.save_take(token, plan, take, multi_device).await;
                }
            }
        }
    }

    /// Encode one device's take
    ///
    /// An encode already under way runs to completion; when the cycle was
    /// cancelled meanwhile its output is removed instead of counted.
    async fn save_take(
        &self,
        token: &CancellationToken,
        plan: &TakePlan,
        take: &DeviceTake,
        multi_device: bool,
    ) {
        let config = &plan.config;
        let position = if multi_device {
            take.device.as_ref().map(|d| position_label(d, take.slot))
        } else {
            None
        };
        let path = config
            .layout
            .take_path(plan.note, position.as_deref(), self.encoder.extension());

        let result = self.write_take(config, take, &path).await;

        let kept = self
            .cycle_update(token, |core| match &result {
                Ok(EncodeOutcome::Compressed { path, stage }) => {
                    debug!("Saved {} via {}", path.display(), stage);
                    core.stats.files_encoded += 1;
                }
                Ok(EncodeOutcome::KeptUncompressed { path }) => {
                    warn!("Compression failed, kept {}", path.display());
                    core.stats.files_uncompressed += 1;
                }
                Err(e) => {
                    error!(note = plan.note, "Failed to save {}: {:#}", path.display(), e);
                    core.stats.write_failures += 1;
                }
            })
            .await;

        if kept.is_none() {
            info!(note = plan.note, "Cycle cancelled during encoding, removing {}", path.display());
            discard_output(&path, result.ok().as_ref()).await;
        }
    }

    async fn write_take(
        &self,
        config: &SessionConfig,
        take: &DeviceTake,
        path: &std::path::Path,
    ) -> Result<EncodeOutcome> {
        if let Some(dir) = path.parent() {
            ensure_dir(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        self.encoder
            .encode(&EncodeRequest {
                samples: &take.samples,
                format: config.format,
                bitrate_kbps: config.bitrate_kbps,
                destination: path,
            })
            .await
    }
}

/// Remove whatever an encode left for `destination`
async fn discard_output(destination: &Path, outcome: Option<&EncodeOutcome>) {
    let mut leftovers = vec![destination.to_path_buf(), destination.with_extension("wav")];
    if let Some(
        EncodeOutcome::Compressed { path, .. } | EncodeOutcome::KeptUncompressed { path },
    ) = outcome
    {
        leftovers.push(path.clone());
    }
    leftovers.sort();
    leftovers.dedup();

    for file in leftovers {
        match tokio::fs::remove_file(&file).await {
            Ok(()) => debug!("Removed {}", file.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", file.display(), e),
        }
    }
}

/// Publishes live levels of the running take
struct LevelPublisher<'a> {
    inner: &'a Inner,
    token: &'a CancellationToken,
}

#[async_trait::async_trait]
impl<'a> LevelObserver for LevelPublisher<'a> {
    async fn on_levels(&self, report: &LevelReport) {
        self.inner
            .cycle_update(self.token, |core| {
                core.level = report.primary();
                core.levels = report.levels.iter().cloned().collect();
            })
            .await;
    }
}

/// Handle to a recording session
///
/// Clones share the same session.
#[derive(Clone)]
pub struct Recorder {
    inner: Arc<Inner>,
}

impl Recorder {
    pub fn new(
        config: SessionConfig,
        host: Arc<dyn AudioHost>,
        encoder: Arc<dyn Encoder>,
        timings: EngineTimings,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let core = SessionCore::new(config);
        let notifier = Notifier::new(core.snapshot(encoder.extension()));

        Ok(Self {
            inner: Arc::new(Inner {
                core: Mutex::new(core),
                host,
                encoder,
                notifier,
                timings,
            }),
        })
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let core = self.inner.core.lock().await;
        core.snapshot(self.inner.encoder.extension())
    }

    /// Follow snapshots as they are published
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.notifier.subscribe()
    }

    pub fn add_sink(&self, sink: Arc<dyn NotificationSink>) {
        self.inner.notifier.add_sink(sink);
    }

    pub async fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        let host = self.inner.host.clone();
        tokio::task::spawn_blocking(move || host.list_devices())
            .await
            .context("Device enumeration task panicked")?
    }

    /// Select project and register; stops any cycle and rewinds to the start note
    pub async fn configure_project(&self, setup: ProjectSetup) -> Result<PathBuf, ConfigError> {
        let mut core = self.inner.core.lock().await;
        let layout = setup.to_layout(&core.config.layout)?;
        let dir = layout.register_dir();
        ensure_dir(&dir).map_err(|source| ConfigError::Io {
            path: dir.clone(),
            source,
        })?;

        core.halt(Phase::Idle);
        core.config.layout = layout;
        core.current_note = core.config.start_note;
        info!("Project {} ready at {}", core.config.layout.project, dir.display());

        self.inner.publish(&core);
        Ok(dir)
    }

    /// Change settings; a take already running keeps the settings it started with
    pub async fn update_settings(
        &self,
        update: SettingsUpdate,
    ) -> Result<SessionSnapshot, ConfigError> {
        let mut core = self.inner.core.lock().await;
        core.config = core.config.apply(&update)?;
        core.clamp_note();
        debug!(
            "Settings updated: notes {}..={}",
            core.config.start_note, core.config.end_note
        );

        self.inner.publish(&core);
        Ok(core.snapshot(self.inner.encoder.extension()))
    }

    /// Record from the current note to the end of the range
    pub async fn start(&self) -> bool {
        self.begin(true).await
    }

    /// Record the current note, then pause
    pub async fn start_single(&self) -> bool {
        self.begin(false).await
    }

    /// Record the current note again, then pause
    pub async fn redo(&self) -> bool {
        self.begin(false).await
    }

    async fn begin(&self, auto_advance: bool) -> bool {
        let mut core = self.inner.core.lock().await;
        core.auto_advance = auto_advance;

        if core.cycle.is_some() || !matches!(core.phase, Phase::Idle | Phase::Paused) {
            debug!("Start ignored, a cycle is already running");
            self.inner.publish(&core);
            return false;
        }

        let token = CancellationToken::new();
        core.cycle = Some(token.clone());
        core.stats.cycle_started_at = Some(Utc::now());

        let previous = core.task.take();
        let inner = self.inner.clone();
        core.task = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                if let Err(e) = previous.await {
                    warn!("Previous recording cycle ended abnormally: {}", e);
                }
            }
            inner.run_cycle(token).await;
        }));

        self.inner.publish(&core);
        true
    }

    /// Cancel the cycle and discard the in-flight take
    pub async fn stop(&self) {
        self.inner
            .update(|core| {
                if core.cycle.is_some() {
                    info!("Recording stopped at note {}", core.current_note);
                }
                core.halt(Phase::Idle);
            })
            .await;
    }

    /// Like `stop`, but leaves the session paused on the current note
    pub async fn pause(&self) {
        self.inner
            .update(|core| {
                if core.cycle.is_some() {
                    info!("Recording paused at note {}", core.current_note);
                }
                core.halt(Phase::Paused);
            })
            .await;
    }

    pub async fn next_note(&self) {
        self.move_pointer(|core| {
            if core.current_note < core.config.end_note {
                core.current_note += 1;
            }
        })
        .await;
    }

    pub async fn prev_note(&self) {
        self.move_pointer(|core| {
            if core.current_note > core.config.start_note {
                core.current_note -= 1;
            }
        })
        .await;
    }

    /// Move to `note` when it lies inside the range; other values are ignored
    pub async fn jump_to(&self, note: i32) {
        self.move_pointer(|core| {
            match u8::try_from(note) {
                Ok(n) if (core.config.start_note..=core.config.end_note).contains(&n) => {
                    core.current_note = n;
                }
                _ => debug!("Ignoring jump to {} outside the note range", note),
            }
        })
        .await;
    }

    async fn move_pointer(&self, f: impl FnOnce(&mut SessionCore)) {
        self.inner
            .update(|core| {
                if core.is_recording() {
                    debug!("Note change ignored while recording");
                } else {
                    f(core);
                }
            })
            .await;
    }

    /// Switch to another register of the project and rewind to the start note
    pub async fn new_register(&self, name: &str, tremulant: bool) -> Result<PathBuf, ConfigError> {
        let mut core = self.inner.core.lock().await;
        let current = &core.config.layout;
        if current.project.is_empty() {
            return Err(ConfigError::MissingField("project"));
        }

        let setup = ProjectSetup {
            project: current.project.clone(),
            register: name.to_string(),
            keyboard: current.keyboard.clone(),
            tremulant,
            output_root: Some(current.output_root.clone()),
        };
        let layout = setup.to_layout(current)?;
        let dir = layout.register_dir();
        ensure_dir(&dir).map_err(|source| ConfigError::Io {
            path: dir.clone(),
            source,
        })?;

        core.halt(Phase::Idle);
        core.config.layout = layout;
        core.current_note = core.config.start_note;
        info!("New register {} at {}", name, dir.display());

        self.inner.publish(&core);
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioBackend, CaptureFormat, DeviceRef};

    struct NoDevices;

    impl AudioHost for NoDevices {
        fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
            Ok(Vec::new())
        }

        fn create_backend(
            &self,
            _device: Option<&DeviceRef>,
            _format: CaptureFormat,
        ) -> Result<Box<dyn AudioBackend>> {
            anyhow::bail!("no devices")
        }
    }

    fn recorder() -> Recorder {
        Recorder::new(
            SessionConfig::default(),
            Arc::new(NoDevices),
            Arc::new(crate::encoder::WavEncoder),
            EngineTimings::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_pointer_moves_are_clamped() {
        let recorder = recorder();
        recorder.prev_note().await;
        assert_eq!(recorder.snapshot().await.current_note(), 36);

        recorder.jump_to(96).await;
        recorder.next_note().await;
        assert_eq!(recorder.snapshot().await.current_note(), 96);

        recorder.jump_to(200).await;
        recorder.jump_to(-3).await;
        recorder.jump_to(20).await;
        assert_eq!(recorder.snapshot().await.current_note(), 96);
    }

    #[tokio::test]
    async fn test_range_change_clamps_pointer() {
        let recorder = recorder();
        recorder.jump_to(50).await;

        let snapshot = recorder
            .update_settings(SettingsUpdate {
                end_note: Some(40),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(snapshot.current_note(), 40);

        let snapshot = recorder
            .update_settings(SettingsUpdate {
                start_note: Some(45),
                end_note: Some(60),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(snapshot.current_note(), 45);
    }

    #[tokio::test]
    async fn test_rejected_settings_leave_state_untouched() {
        let recorder = recorder();
        let before = recorder.snapshot().await;

        let result = recorder
            .update_settings(SettingsUpdate {
                sample_rate: Some(48000),
                start_note: Some(90),
                end_note: Some(80),
                ..Default::default()
            })
            .await;
        assert!(result.is_err());

        let after = recorder.snapshot().await;
        assert_eq!(after.settings, before.settings);
    }

    #[tokio::test]
    async fn test_pause_from_idle() {
        let recorder = recorder();
        recorder.pause().await;
        let snapshot = recorder.snapshot().await;
        assert_eq!(snapshot.phase, Phase::Paused);
        assert!(!snapshot.is_running);
    }

    #[tokio::test]
    async fn test_new_register_requires_project() {
        let recorder = recorder();
        assert!(matches!(
            recorder.new_register("Prestant 8", false).await,
            Err(ConfigError::MissingField("project"))
        ));
    }
}
