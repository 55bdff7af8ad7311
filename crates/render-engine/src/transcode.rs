//! Video → animated GIF transcoding.
//!
//! The job samples the video at a fixed rate, scales each sample onto the
//! output canvas, and appends it to a looping GIF. It runs on its own task
//! and reports progress over a watch channel, so callers never block on it.

use gif::{Encoder, Frame as GifFrame, Repeat};
use image::imageops::{self, FilterType};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tabsnap_capture_engine::CaptureArtifact;
use tabsnap_common::config::{GifDefaults, HostToolsConfig};
use tabsnap_common::error::{ArtifactKind, TabsnapError, TabsnapResult};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::video::{FfmpegVideoSource, VideoSource};

/// NeuQuant sampling factor; 1 is best quality, 30 fastest.
const QUANTIZE_SPEED: i32 = 10;

/// Where a GIF job is.
///
/// Frames stream through the encoder as they are sampled, so `Encoding`
/// starts with the first appended frame and lasts through finalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GifStatus {
    /// Probing the video and seeking to the first sample.
    Sampling,
    Encoding,
    Done,
    Failed,
}

/// Output parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GifOptions {
    pub fps: u32,
    pub scale: f64,
}

impl From<&GifDefaults> for GifOptions {
    fn from(defaults: &GifDefaults) -> Self {
        Self {
            fps: defaults.fps,
            scale: defaults.scale,
        }
    }
}

impl Default for GifOptions {
    fn default() -> Self {
        Self::from(&GifDefaults::default())
    }
}

impl GifOptions {
    fn validate(&self) -> TabsnapResult<()> {
        if self.fps == 0 {
            return Err(TabsnapError::transcode("frame rate must be at least 1"));
        }
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(TabsnapError::transcode(format!(
                "scale must be positive, got {}",
                self.scale
            )));
        }
        Ok(())
    }

    /// Per-frame delay in the GIF's hundredths of a second (1000/fps ms).
    pub fn delay_hundredths(&self) -> u16 {
        let ms = 1000.0 / self.fps.max(1) as f64;
        ((ms / 10.0).round() as u16).max(1)
    }

    /// Output canvas for a `width`×`height` source.
    pub fn canvas_size(&self, width: u32, height: u32) -> (u32, u32) {
        let scaled = |v: u32| ((v as f64 * self.scale).round() as u32).max(1);
        (scaled(width), scaled(height))
    }
}

/// Sample instants `0, 1/fps, 2/fps, …` strictly before `duration_secs`.
pub fn sample_instants(duration_secs: f64, fps: u32) -> Vec<f64> {
    if fps == 0 || !duration_secs.is_finite() || duration_secs <= 0.0 {
        return Vec::new();
    }
    let mut instants = Vec::new();
    let mut i = 0u64;
    loop {
        let t = i as f64 / fps as f64;
        if t >= duration_secs {
            break;
        }
        instants.push(t);
        i += 1;
    }
    instants
}

/// Converts videos into GIFs.
#[derive(Debug, Clone, Default)]
pub struct GifTranscoder {
    options: GifOptions,
}

impl GifTranscoder {
    pub fn new(options: GifOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> GifOptions {
        self.options
    }

    /// Start transcoding a recorded video on a background task.
    pub async fn spawn_for_artifact(
        &self,
        artifact: &CaptureArtifact,
        tools: &HostToolsConfig,
    ) -> TabsnapResult<GifJob> {
        if artifact.kind() != ArtifactKind::Video {
            return Err(TabsnapError::transcode("only recordings can become GIFs"));
        }
        let source = FfmpegVideoSource::from_bytes(artifact.bytes(), tools).await?;
        Ok(self.spawn(Box::new(source)))
    }

    /// Start transcoding `source` on a background task.
    pub fn spawn(&self, mut source: Box<dyn VideoSource>) -> GifJob {
        let (status_tx, status_rx) = watch::channel(GifStatus::Sampling);
        let transcoder = self.clone();
        let handle = tokio::spawn(async move {
            let result = transcoder.transcode(source.as_mut(), &status_tx).await;
            let final_status = match &result {
                Ok(_) => GifStatus::Done,
                Err(e) => {
                    tracing::warn!(error = %e, "GIF transcode failed");
                    GifStatus::Failed
                }
            };
            let _ = status_tx.send(final_status);
            result
        });
        GifJob {
            options: self.options,
            status: status_rx,
            handle,
        }
    }

    /// Transcode in the current task, publishing progress on `status`.
    pub async fn transcode(
        &self,
        source: &mut dyn VideoSource,
        status: &watch::Sender<GifStatus>,
    ) -> TabsnapResult<Vec<u8>> {
        self.options.validate()?;
        let _ = status.send(GifStatus::Sampling);

        let meta = source.metadata().await?;
        let (out_w, out_h) = self.options.canvas_size(meta.width, meta.height);
        let (gif_w, gif_h) = match (u16::try_from(out_w), u16::try_from(out_h)) {
            (Ok(w), Ok(h)) => (w, h),
            _ => {
                return Err(TabsnapError::transcode(format!(
                    "{out_w}x{out_h} exceeds the GIF size limit"
                )))
            }
        };

        let instants = sample_instants(meta.duration_secs, self.options.fps);
        if instants.is_empty() {
            return Err(TabsnapError::transcode("video is empty"));
        }
        tracing::info!(
            samples = instants.len(),
            width = out_w,
            height = out_h,
            fps = self.options.fps,
            "Transcoding to GIF"
        );

        let mut encoder = Encoder::new(Vec::new(), gif_w, gif_h, &[]).map_err(transcode_error)?;
        encoder.set_repeat(Repeat::Infinite).map_err(transcode_error)?;
        let delay = self.options.delay_hundredths();

        let mut previous: Option<RgbaImage> = None;
        for (index, &t) in instants.iter().enumerate() {
            let canvas = match source.frame_at(t).await? {
                Some(frame) => imageops::resize(&frame, out_w, out_h, FilterType::Triangle),
                None => match &previous {
                    Some(last) => {
                        tracing::debug!(t, "No frame at sample; repeating previous");
                        last.clone()
                    }
                    None => return Err(TabsnapError::transcode("video has no decodable frames")),
                },
            };
            previous = Some(canvas.clone());

            let frame = tokio::task::spawn_blocking(move || quantize(canvas, gif_w, gif_h, delay))
                .await
                .map_err(|e| TabsnapError::transcode(format!("frame encoder panicked: {e}")))?;
            encoder.write_frame(&frame).map_err(transcode_error)?;
            if index == 0 {
                let _ = status.send(GifStatus::Encoding);
            }
            tracing::trace!(index, t, "Appended GIF frame");
        }

        let bytes = encoder.into_inner().map_err(transcode_error)?;
        tracing::info!(frames = instants.len(), bytes = bytes.len(), "GIF ready");
        Ok(bytes)
    }
}

fn quantize(canvas: RgbaImage, width: u16, height: u16, delay: u16) -> GifFrame<'static> {
    let mut rgba = canvas.into_raw();
    let mut frame = GifFrame::from_rgba_speed(width, height, &mut rgba, QUANTIZE_SPEED);
    frame.delay = delay;
    frame
}

fn transcode_error(err: impl std::fmt::Display) -> TabsnapError {
    TabsnapError::transcode(err.to_string())
}

/// A transcode running in the background.
pub struct GifJob {
    options: GifOptions,
    status: watch::Receiver<GifStatus>,
    handle: JoinHandle<TabsnapResult<Vec<u8>>>,
}

impl GifJob {
    pub fn options(&self) -> GifOptions {
        self.options
    }

    pub fn status(&self) -> GifStatus {
        *self.status.borrow()
    }

    /// A receiver that sees every later status change.
    pub fn subscribe(&self) -> watch::Receiver<GifStatus> {
        self.status.clone()
    }

    /// Wait for the GIF bytes.
    pub async fn wait(self) -> TabsnapResult<Vec<u8>> {
        self.handle
            .await
            .map_err(|e| TabsnapError::transcode(format!("GIF task failed: {e}")))?
    }
}
