//! Live screen mirroring.
//!
//! ```text
//! helper payload ──push──▶ device ──spawn──▶ mirror server
//!                                                │ video socket
//!                                                ▼
//!                       pump task ──chunks──▶ VideoDecoder
//!                                                │ bounded frame channel
//!                                                ▼
//!                       render task ──blit──▶ MirrorCanvas (frame released)
//! ```
//!
//! Teardown closes whatever was opened, in reverse order, and is safe to run
//! more than once or after a start that failed halfway.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use image::RgbaImage;
use tabsnap_common::config::MirrorDefaults;
use tabsnap_common::error::{TabsnapError, TabsnapResult};
use tabsnap_device_core::{
    stream_from_bytes, ByteStream, DecodedFrame, DecoderFactory, DeviceSession, RemoteProcess,
    VideoCodec, VideoDecoder,
};
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::channel::{CommandChannel, CHUNK_SIZE};
use crate::transfer::FileTransfer;

/// Java class started on the device.
const SERVER_CLASS: &str = "com.genymobile.scrcpy.Server";

/// Mirroring parameters.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub remote_server_path: String,
    pub server_version: String,
    pub max_size: u32,
    pub video_bit_rate: u32,
    pub socket_name: String,
    pub connect_attempts: u32,
    pub connect_retry: Duration,
    pub frame_pool: usize,
}

impl From<&MirrorDefaults> for MirrorConfig {
    fn from(defaults: &MirrorDefaults) -> Self {
        Self {
            remote_server_path: defaults.remote_server_path.clone(),
            server_version: defaults.server_version.clone(),
            max_size: defaults.max_size,
            video_bit_rate: defaults.video_bit_rate,
            socket_name: defaults.socket_name.clone(),
            connect_attempts: defaults.connect_attempts.max(1),
            connect_retry: Duration::from_millis(defaults.connect_retry_ms),
            frame_pool: defaults.frame_pool.max(1),
        }
    }
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self::from(&MirrorDefaults::default())
    }
}

impl MirrorConfig {
    /// Shell command that starts the mirror server: video only, bounded
    /// dimension and bitrate, raw H.264 on the socket.
    pub fn server_command(&self) -> String {
        format!(
            "CLASSPATH={} app_process / {SERVER_CLASS} {} tunnel_forward=true audio=false \
             control=false cleanup=false raw_stream=true max_size={} video_bit_rate={}",
            self.remote_server_path, self.server_version, self.max_size, self.video_bit_rate
        )
    }
}

/// Where the helper server payload comes from.
#[async_trait::async_trait]
pub trait PayloadSource: Send + Sync {
    async fn fetch(&self) -> TabsnapResult<ByteStream>;
}

/// Payload read from a local file.
#[derive(Debug, Clone)]
pub struct FilePayload(pub PathBuf);

#[async_trait::async_trait]
impl PayloadSource for FilePayload {
    async fn fetch(&self) -> TabsnapResult<ByteStream> {
        let file = tokio::fs::File::open(&self.0).await.map_err(|e| {
            TabsnapError::file_transfer(
                self.0.display().to_string(),
                format!("cannot open mirror server payload: {e}"),
            )
        })?;
        Ok(Box::new(file))
    }
}

/// Payload already held in memory.
#[derive(Debug, Clone)]
pub struct BytesPayload(pub Arc<Vec<u8>>);

#[async_trait::async_trait]
impl PayloadSource for BytesPayload {
    async fn fetch(&self) -> TabsnapResult<ByteStream> {
        Ok(stream_from_bytes(self.0.as_ref().clone()))
    }
}

/// Persistent render target for decoded frames.
#[derive(Debug, Default)]
pub struct MirrorCanvas {
    image: Option<RgbaImage>,
    frames: u64,
    resizes: u64,
}

impl MirrorCanvas {
    /// Draw `frame`, reallocating only when its dimensions change.
    pub fn blit(&mut self, frame: &DecodedFrame) {
        let (width, height) = (frame.display_width(), frame.display_height());
        let expected = width as usize * height as usize * 4;
        if frame.pixels().len() != expected {
            tracing::warn!(
                width,
                height,
                len = frame.pixels().len(),
                "Dropping frame with inconsistent buffer size"
            );
            return;
        }

        let needs_resize = self
            .image
            .as_ref()
            .map(|img| img.dimensions() != (width, height))
            .unwrap_or(true);
        if needs_resize {
            tracing::debug!(width, height, "Resizing mirror canvas");
            self.image = Some(RgbaImage::new(width, height));
            self.resizes += 1;
        }
        if let Some(image) = self.image.as_mut() {
            image.copy_from_slice(frame.pixels());
        }
        self.frames += 1;
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.image.as_ref().map(|img| img.dimensions())
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// How many times the canvas was (re)allocated.
    pub fn resizes(&self) -> u64 {
        self.resizes
    }

    pub fn snapshot(&self) -> Option<RgbaImage> {
        self.image.clone()
    }
}

/// Read-only view of a running mirror, for the caller to present.
#[derive(Clone)]
pub struct MirrorView {
    canvas: Arc<Mutex<MirrorCanvas>>,
    streaming: Arc<AtomicBool>,
    bytes: Arc<AtomicU64>,
}

impl MirrorView {
    fn new() -> Self {
        Self {
            canvas: Arc::new(Mutex::new(MirrorCanvas::default())),
            streaming: Arc::new(AtomicBool::new(false)),
            bytes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Whether the video stream is still flowing.
    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    pub fn frames_rendered(&self) -> u64 {
        self.canvas().frames()
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.canvas().dimensions()
    }

    pub fn snapshot(&self) -> Option<RgbaImage> {
        self.canvas().snapshot()
    }

    pub fn canvas(&self) -> MutexGuard<'_, MirrorCanvas> {
        self.canvas.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Everything a mirror holds open. Each resource is released at most once.
pub struct MirrorSession {
    remote_server_path: String,
    server: Option<Box<dyn RemoteProcess>>,
    decoder: Option<Box<dyn VideoDecoder>>,
    stop_tx: Option<watch::Sender<bool>>,
    pump: Option<JoinHandle<()>>,
    render: Option<JoinHandle<()>>,
    view: MirrorView,
    active: bool,
}

impl MirrorSession {
    fn new(remote_server_path: String) -> Self {
        Self {
            remote_server_path,
            server: None,
            decoder: None,
            stop_tx: None,
            pump: None,
            render: None,
            view: MirrorView::new(),
            active: false,
        }
    }

    pub fn remote_server_path(&self) -> &str {
        &self.remote_server_path
    }

    /// True between a completed start and the first stop.
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn view(&self) -> MirrorView {
        self.view.clone()
    }

    /// Stop streaming, close the decoder, and release the server process.
    pub async fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        // The pump owns the decoder once started and closes it on exit.
        if let Some(pump) = self.pump.take() {
            if let Err(e) = pump.await {
                tracing::warn!(error = %e, "Mirror pump task failed");
            }
        }
        if let Some(mut decoder) = self.decoder.take() {
            if let Err(e) = decoder.close().await {
                tracing::warn!(error = %e, "Failed to close decoder");
            }
        }
        if let Some(render) = self.render.take() {
            if let Err(e) = render.await {
                tracing::warn!(error = %e, "Mirror render task failed");
            }
        }
        if let Some(mut server) = self.server.take() {
            if let Err(e) = server.kill().await {
                tracing::warn!(error = %e, "Failed to stop mirror server");
            }
        }
        self.view.streaming.store(false, Ordering::SeqCst);
        if self.active {
            tracing::info!(frames = self.view.frames_rendered(), "Mirroring stopped");
        }
        self.active = false;
    }
}

/// Starts mirror sessions against one device.
pub struct MirrorPipeline {
    channel: CommandChannel,
    transfer: FileTransfer,
    decoders: Arc<dyn DecoderFactory>,
    payload: Arc<dyn PayloadSource>,
    config: MirrorConfig,
}

impl MirrorPipeline {
    pub fn new(
        session: Arc<DeviceSession>,
        decoders: Arc<dyn DecoderFactory>,
        payload: Arc<dyn PayloadSource>,
        config: MirrorConfig,
    ) -> Self {
        Self::with_channel(CommandChannel::new(session), decoders, payload, config)
    }

    /// Share an existing command channel (and its one-at-a-time gate).
    pub fn with_channel(
        channel: CommandChannel,
        decoders: Arc<dyn DecoderFactory>,
        payload: Arc<dyn PayloadSource>,
        config: MirrorConfig,
    ) -> Self {
        let transfer = FileTransfer::new(channel.session().clone());
        Self {
            channel,
            transfer,
            decoders,
            payload,
            config,
        }
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    /// Start mirroring. On failure everything opened so far is closed
    /// before the error is returned.
    pub async fn start(&self) -> TabsnapResult<MirrorSession> {
        let mut session = MirrorSession::new(self.config.remote_server_path.clone());
        match self.open(&mut session).await {
            Ok(()) => {
                session.active = true;
                tracing::info!("Mirroring started");
                Ok(session)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Mirror start failed; tearing down");
                session.stop().await;
                Err(e)
            }
        }
    }

    async fn open(&self, session: &mut MirrorSession) -> TabsnapResult<()> {
        let payload = self.payload.fetch().await?;
        self.transfer
            .push(&self.config.remote_server_path, payload, 0o644)
            .await?;

        let server = self.channel.spawn(&self.config.server_command()).await?;
        session.server = Some(server);

        let (frames_tx, frames_rx) = mpsc::channel(self.config.frame_pool);
        let decoder = self
            .decoders
            .open(VideoCodec::H264, frames_tx)
            .map_err(|e| match e {
                TabsnapError::DecoderInit { .. } => e,
                other => TabsnapError::decoder_init(other.to_string()),
            })?;
        session.decoder = Some(decoder);

        let video = self.open_video_socket().await?;

        let (stop_tx, stop_rx) = watch::channel(false);
        session.stop_tx = Some(stop_tx);
        session.view.streaming.store(true, Ordering::SeqCst);

        session.render = Some(tokio::spawn(render_frames(
            frames_rx,
            stop_rx.clone(),
            session.view.clone(),
        )));
        if let Some(decoder) = session.decoder.take() {
            session.pump = Some(tokio::spawn(pump_video(
                video,
                decoder,
                stop_rx,
                session.view.clone(),
            )));
        }
        Ok(())
    }

    /// The server needs a moment to bind its socket after spawning.
    async fn open_video_socket(&self) -> TabsnapResult<ByteStream> {
        let transport = self.channel.session().transport()?;
        let mut last_error = None;
        for attempt in 1..=self.config.connect_attempts {
            match transport.open_socket(&self.config.socket_name).await {
                Ok(stream) => {
                    tracing::debug!(attempt, "Video socket connected");
                    return Ok(stream);
                }
                Err(e) if e.is_session_fatal() => return Err(self.channel.observe(e)),
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "Video socket not ready");
                    last_error = Some(e);
                    tokio::time::sleep(self.config.connect_retry).await;
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            TabsnapError::command_failed(self.config.server_command(), "video socket never opened")
        }))
    }
}

async fn pump_video(
    mut video: ByteStream,
    mut decoder: Box<dyn VideoDecoder>,
    mut stop_rx: watch::Receiver<bool>,
    view: MirrorView,
) {
    let mut chunk = vec![0u8; CHUNK_SIZE];
    loop {
        let n = tokio::select! {
            _ = stop_rx.changed() => break,
            read = video.read(&mut chunk) => match read {
                Ok(0) => {
                    tracing::info!("Mirror video stream ended");
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(error = %e, "Mirror video stream failed");
                    break;
                }
            }
        };
        view.bytes.fetch_add(n as u64, Ordering::Relaxed);

        let pushed = tokio::select! {
            _ = stop_rx.changed() => break,
            pushed = decoder.push(&chunk[..n]) => pushed,
        };
        if let Err(e) = pushed {
            tracing::warn!(error = %e, "Decoder rejected video data");
            break;
        }
    }
    view.streaming.store(false, Ordering::SeqCst);
    if let Err(e) = decoder.close().await {
        tracing::warn!(error = %e, "Failed to close decoder");
    }
}

async fn render_frames(
    mut frames: mpsc::Receiver<DecodedFrame>,
    mut stop_rx: watch::Receiver<bool>,
    view: MirrorView,
) {
    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            frame = frames.recv() => match frame {
                Some(frame) => {
                    view.canvas().blit(&frame);
                    frame.close();
                }
                None => break,
            }
        }
    }
}
