//! Capture controller: the single owner of the device's capture mode.
//!
//! Every mode is entered from `Idle` and returns to `Idle`. Screenshots are
//! one-shot; recordings and mirrors hold remote resources until stopped.
//! Any failure puts the controller back in `Idle` so it never reports a mode
//! without the resource behind it.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tabsnap_common::config::AppConfig;
use tabsnap_common::error::{TabsnapError, TabsnapResult};
use tabsnap_device_core::{DeviceSession, RemoteProcess};

use crate::artifact::CaptureArtifact;
use crate::channel::CommandChannel;
use crate::mirror::{MirrorPipeline, MirrorSession, MirrorView};
use crate::transfer::FileTransfer;
use crate::wireless::{enable_wireless, WirelessEndpoint};

pub const SCREENCAP_COMMAND: &str = "screencap -p";
pub const INTERRUPT_RECORDER_COMMAND: &str = "pkill -2 screenrecord";

/// `screenrecord --time-limit <T> <remotePath>`
pub fn recording_command(time_limit_secs: u32, remote_path: &str) -> String {
    format!("screenrecord --time-limit {time_limit_secs} {remote_path}")
}

/// `rm <remotePath>`
pub fn remove_command(remote_path: &str) -> String {
    format!("rm {remote_path}")
}

/// What the controller is doing with the device right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    #[default]
    Idle,
    Screenshot,
    Recording,
    Mirroring,
}

impl CaptureMode {
    /// Only `Idle → X` and `X → Idle` are legal.
    pub fn can_transition_to(self, next: CaptureMode) -> bool {
        match (self, next) {
            (CaptureMode::Idle, CaptureMode::Idle) => false,
            (CaptureMode::Idle, _) | (_, CaptureMode::Idle) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Screenshot => "capturing a screenshot",
            Self::Recording => "recording",
            Self::Mirroring => "mirroring",
        };
        f.write_str(label)
    }
}

/// Lifecycle of one recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingStatus {
    Starting,
    Running,
    Stopping,
    Pulled,
    Failed,
}

/// A recording in progress. The remote file it names must be deleted
/// before the job is finished, whatever the outcome.
pub struct RecordingJob {
    remote_path: String,
    time_limit_secs: u32,
    status: RecordingStatus,
    recorder: Option<Box<dyn RemoteProcess>>,
}

impl RecordingJob {
    fn new(remote_path: String, time_limit_secs: u32) -> Self {
        Self {
            remote_path,
            time_limit_secs,
            status: RecordingStatus::Starting,
            recorder: None,
        }
    }

    pub fn remote_path(&self) -> &str {
        &self.remote_path
    }

    pub fn time_limit_secs(&self) -> u32 {
        self.time_limit_secs
    }

    pub fn status(&self) -> RecordingStatus {
        self.status
    }
}

impl std::fmt::Debug for RecordingJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingJob")
            .field("remote_path", &self.remote_path)
            .field("time_limit_secs", &self.time_limit_secs)
            .field("status", &self.status)
            .finish()
    }
}

/// Controller tuning.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Device-side recording ceiling.
    pub time_limit_secs: u32,

    /// Fixed wait between recorder exit and pull.
    pub settle_delay: Duration,

    /// Longest wait for the interrupted recorder to exit.
    pub recorder_exit_timeout: Duration,

    pub remote_recording_path: String,

    pub wireless_port: u16,
}

impl CaptureConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            time_limit_secs: config.capture.recording_time_limit_secs,
            settle_delay: Duration::from_millis(config.capture.settle_delay_ms),
            recorder_exit_timeout: Duration::from_millis(config.capture.recorder_exit_timeout_ms),
            remote_recording_path: config.capture.remote_recording_path.clone(),
            wireless_port: config.wireless.port,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self::from_app(&AppConfig::default())
    }
}

/// Orchestrates captures against one device session.
pub struct CaptureController {
    channel: CommandChannel,
    transfer: FileTransfer,
    config: CaptureConfig,
    mode: CaptureMode,
    recording: Option<RecordingJob>,
    last_recording_status: Option<RecordingStatus>,
    mirror: Option<MirrorSession>,
    last_artifact: Option<CaptureArtifact>,
    last_error: Option<String>,
}

impl CaptureController {
    pub fn new(session: Arc<DeviceSession>, config: CaptureConfig) -> Self {
        Self::with_channel(CommandChannel::new(session), config)
    }

    pub fn with_channel(channel: CommandChannel, config: CaptureConfig) -> Self {
        let transfer = FileTransfer::new(channel.session().clone());
        Self {
            channel,
            transfer,
            config,
            mode: CaptureMode::Idle,
            recording: None,
            last_recording_status: None,
            mirror: None,
            last_artifact: None,
            last_error: None,
        }
    }

    /// The controller's command channel, for collaborators that must share
    /// its one-command-at-a-time gate.
    pub fn channel(&self) -> &CommandChannel {
        &self.channel
    }

    pub fn session(&self) -> &Arc<DeviceSession> {
        self.channel.session()
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    pub fn recording(&self) -> Option<&RecordingJob> {
        self.recording.as_ref()
    }

    /// Outcome of the most recently finished recording.
    pub fn last_recording_status(&self) -> Option<RecordingStatus> {
        self.last_recording_status
    }

    /// The latest capture; kept across failures and disconnects.
    pub fn last_artifact(&self) -> Option<&CaptureArtifact> {
        self.last_artifact.as_ref()
    }

    /// Human-readable message of the latest failure.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Capture one PNG of the device screen.
    pub async fn capture_screenshot(&mut self) -> TabsnapResult<CaptureArtifact> {
        self.enter(CaptureMode::Screenshot, "capture a screenshot")
            .await?;
        tracing::info!("Capturing screenshot");

        let result = match self.channel.run_bytes(SCREENCAP_COMMAND).await {
            Ok(bytes) => CaptureArtifact::image(bytes),
            Err(e) => Err(e),
        };
        self.set_mode(CaptureMode::Idle);

        let artifact = self.conclude(result).await?;
        tracing::info!(bytes = artifact.len(), "Screenshot captured");
        self.last_artifact = Some(artifact.clone());
        Ok(artifact)
    }

    /// Spawn the device recorder and return once it is running.
    pub async fn start_recording(&mut self) -> TabsnapResult<()> {
        self.enter(CaptureMode::Recording, "start recording").await?;

        let mut job = RecordingJob::new(
            self.config.remote_recording_path.clone(),
            self.config.time_limit_secs,
        );
        let command = recording_command(job.time_limit_secs, &job.remote_path);
        tracing::info!(path = %job.remote_path, limit_secs = job.time_limit_secs, "Starting recording");

        match self.channel.spawn(&command).await {
            Ok(recorder) => {
                job.recorder = Some(recorder);
                job.status = RecordingStatus::Running;
                self.recording = Some(job);
                tracing::info!("Recording running");
                Ok(())
            }
            Err(e) => {
                job.status = RecordingStatus::Failed;
                self.remove_remote(&job.remote_path).await;
                self.last_recording_status = Some(job.status);
                self.set_mode(CaptureMode::Idle);
                self.conclude(Err(e)).await
            }
        }
    }

    /// Interrupt the recorder, pull the file, and delete it from the device.
    ///
    /// The remote delete runs whatever happened before it, and the
    /// controller is back in `Idle` afterwards even on failure.
    pub async fn stop_recording(&mut self) -> TabsnapResult<CaptureArtifact> {
        let Some(mut job) = self.recording.take() else {
            return Err(TabsnapError::invalid_state(self.mode, "stop recording"));
        };
        job.status = RecordingStatus::Stopping;
        tracing::info!(path = %job.remote_path, "Stopping recording");

        let result = self.collect_recording(&mut job).await;
        self.remove_remote(&job.remote_path).await;

        job.status = match result {
            Ok(_) => RecordingStatus::Pulled,
            Err(_) => RecordingStatus::Failed,
        };
        self.last_recording_status = Some(job.status);
        self.set_mode(CaptureMode::Idle);

        let artifact = self.conclude(result).await?;
        tracing::info!(bytes = artifact.len(), "Recording pulled");
        self.last_artifact = Some(artifact.clone());
        Ok(artifact)
    }

    /// Start live mirroring through `pipeline`.
    pub async fn start_mirroring(&mut self, pipeline: &MirrorPipeline) -> TabsnapResult<MirrorView> {
        self.enter(CaptureMode::Mirroring, "start mirroring").await?;
        match pipeline.start().await {
            Ok(mirror) => {
                let view = mirror.view();
                self.mirror = Some(mirror);
                Ok(view)
            }
            Err(e) => {
                self.set_mode(CaptureMode::Idle);
                self.conclude(Err(e)).await
            }
        }
    }

    /// Stop mirroring. Does nothing when no mirror is running.
    pub async fn stop_mirroring(&mut self) {
        if let Some(mut mirror) = self.mirror.take() {
            mirror.stop().await;
        }
        if self.mode == CaptureMode::Mirroring {
            self.set_mode(CaptureMode::Idle);
        }
    }

    /// Switch the device to wireless debugging and report its address.
    pub async fn enable_wireless(&mut self) -> TabsnapResult<WirelessEndpoint> {
        self.reap_mirror().await;
        if self.mode != CaptureMode::Idle {
            return Err(TabsnapError::invalid_state(self.mode, "enable wireless debugging"));
        }
        let result = enable_wireless(&self.channel, self.config.wireless_port).await;
        self.conclude(result).await
    }

    /// Release every remote resource and disconnect the session.
    pub async fn shutdown(&mut self) -> TabsnapResult<()> {
        if let Some(mut job) = self.recording.take() {
            tracing::info!(path = %job.remote_path, "Discarding recording on shutdown");
            self.discard_recording(&mut job).await;
        }
        self.stop_mirroring().await;
        self.set_mode(CaptureMode::Idle);
        self.session().disconnect().await
    }

    /// Steps 1-4 of stopping: interrupt, await exit, settle, pull, check.
    async fn collect_recording(&self, job: &mut RecordingJob) -> TabsnapResult<CaptureArtifact> {
        self.interrupt_recorder(job).await?;
        tokio::time::sleep(self.config.settle_delay).await;
        let bytes = self.transfer.pull(&job.remote_path).await?;
        CaptureArtifact::video(bytes)
    }

    /// Signal the recorder by name, then wait for its handle to report exit.
    /// A failed signal is tolerated: the recorder may already have hit its
    /// time limit, in which case `pkill` finds nothing.
    async fn interrupt_recorder(&self, job: &mut RecordingJob) -> TabsnapResult<()> {
        match self.channel.run_bytes(INTERRUPT_RECORDER_COMMAND).await {
            Ok(_) => tracing::debug!("Recorder interrupted"),
            Err(e) if e.is_session_fatal() => return Err(e),
            Err(e) => tracing::warn!(error = %e, "Recorder interrupt failed; continuing"),
        }

        if let Some(mut recorder) = job.recorder.take() {
            match tokio::time::timeout(self.config.recorder_exit_timeout, recorder.wait()).await {
                Ok(Ok(())) => tracing::debug!("Recorder exited"),
                Ok(Err(e)) => tracing::warn!(error = %e, "Recorder exited abnormally"),
                Err(_) => tracing::warn!(
                    timeout_ms = self.config.recorder_exit_timeout.as_millis() as u64,
                    "Recorder did not report exit in time"
                ),
            }
            if let Err(e) = recorder.kill().await {
                tracing::debug!(error = %e, "Failed to release recorder handle");
            }
        }
        Ok(())
    }

    async fn discard_recording(&self, job: &mut RecordingJob) {
        if let Err(e) = self.interrupt_recorder(job).await {
            tracing::warn!(error = %e, "Could not interrupt recorder");
        }
        self.remove_remote(&job.remote_path).await;
        job.status = RecordingStatus::Failed;
    }

    /// Best-effort delete of a device file; failures are logged.
    async fn remove_remote(&self, remote_path: &str) {
        let command = remove_command(remote_path);
        match self.channel.run_bytes(&command).await {
            Ok(_) => tracing::debug!(path = remote_path, "Removed remote file"),
            Err(e) => tracing::warn!(path = remote_path, error = %e, "Failed to remove remote file"),
        }
    }

    async fn enter(&mut self, next: CaptureMode, action: &str) -> TabsnapResult<()> {
        self.reap_mirror().await;
        if !self.mode.can_transition_to(next) {
            tracing::warn!(current = ?self.mode, requested = ?next, "Rejected mode change");
            return Err(TabsnapError::invalid_state(self.mode, action));
        }
        if let Err(e) = self.session().transport() {
            return self.conclude(Err(e)).await;
        }
        self.set_mode(next);
        Ok(())
    }

    fn set_mode(&mut self, next: CaptureMode) {
        if self.mode != next {
            tracing::debug!(from = ?self.mode, to = ?next, "Capture mode changed");
            self.mode = next;
        }
    }

    /// A mirror whose stream ended on its own is stopped and forgotten.
    async fn reap_mirror(&mut self) {
        let ended = self
            .mirror
            .as_ref()
            .map(|m| !m.view().is_streaming())
            .unwrap_or(false);
        if ended {
            tracing::info!("Mirror stream ended; returning to idle");
            self.stop_mirroring().await;
        }
    }

    /// Record a failure, tearing everything down if the link is gone.
    async fn conclude<T>(&mut self, result: TabsnapResult<T>) -> TabsnapResult<T> {
        if let Err(e) = &result {
            tracing::warn!(error = %e, "Capture operation failed");
            self.last_error = Some(e.to_string());
            if e.is_session_fatal() {
                self.teardown_after_disconnect().await;
            }
        }
        result
    }

    /// Reset every mode after transport loss. Artifacts are kept.
    async fn teardown_after_disconnect(&mut self) {
        tracing::warn!("Device link lost; resetting capture state");
        self.session().mark_lost("transport failure");
        if let Some(mut job) = self.recording.take() {
            if let Some(mut recorder) = job.recorder.take() {
                let _ = recorder.kill().await;
            }
            self.last_recording_status = Some(RecordingStatus::Failed);
        }
        if let Some(mut mirror) = self.mirror.take() {
            mirror.stop().await;
        }
        self.set_mode(CaptureMode::Idle);
        if let Err(e) = self.session().disconnect().await {
            tracing::debug!(error = %e, "Transport close after loss failed");
        }
    }
}
