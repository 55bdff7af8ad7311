//! Random-access frame sampling from a recorded video.

use std::path::Path;
use std::process::Stdio;

use image::RgbaImage;
use serde::Deserialize;
use tabsnap_common::config::HostToolsConfig;
use tabsnap_common::error::{TabsnapError, TabsnapResult};
use tempfile::NamedTempFile;
use tokio::process::Command;

/// Duration and native size of a video.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoMetadata {
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
}

/// A video that can be seeked to arbitrary instants.
#[async_trait::async_trait]
pub trait VideoSource: Send {
    async fn metadata(&mut self) -> TabsnapResult<VideoMetadata>;

    /// The frame shown at `t` seconds, once the seek has completed.
    /// `None` when nothing decodes at `t` (past the last frame).
    async fn frame_at(&mut self, t: f64) -> TabsnapResult<Option<RgbaImage>>;
}

/// Samples frames with `ffprobe` and `ffmpeg` from a temp copy of the video.
#[derive(Debug)]
pub struct FfmpegVideoSource {
    ffmpeg: String,
    ffprobe: String,
    file: NamedTempFile,
    metadata: Option<VideoMetadata>,
}

impl FfmpegVideoSource {
    /// Write `bytes` to a temp file and sample from it.
    pub async fn from_bytes(bytes: &[u8], tools: &HostToolsConfig) -> TabsnapResult<Self> {
        let file = tempfile::Builder::new()
            .prefix("tabsnap-video-")
            .suffix(".mp4")
            .tempfile()
            .map_err(|e| TabsnapError::transcode(format!("cannot stage video: {e}")))?;
        tokio::fs::write(file.path(), bytes)
            .await
            .map_err(|e| TabsnapError::transcode(format!("cannot stage video: {e}")))?;
        tracing::debug!(path = %file.path().display(), bytes = bytes.len(), "Staged video for sampling");
        Ok(Self {
            ffmpeg: tools.ffmpeg.clone(),
            ffprobe: tools.ffprobe.clone(),
            file,
            metadata: None,
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    async fn read_metadata(&self) -> TabsnapResult<VideoMetadata> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height:format=duration",
                "-of",
                "json",
            ])
            .arg(self.path())
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| TabsnapError::transcode(format!("failed to run `{}`: {e}", self.ffprobe)))?;

        if !output.status.success() {
            return Err(TabsnapError::transcode(format!(
                "ffprobe failed ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        parse_media_info(&output.stdout)
    }
}

#[async_trait::async_trait]
impl VideoSource for FfmpegVideoSource {
    async fn metadata(&mut self) -> TabsnapResult<VideoMetadata> {
        if let Some(metadata) = self.metadata {
            return Ok(metadata);
        }
        let metadata = self.read_metadata().await?;
        tracing::debug!(
            duration_secs = metadata.duration_secs,
            width = metadata.width,
            height = metadata.height,
            "Read video metadata"
        );
        self.metadata = Some(metadata);
        Ok(metadata)
    }

    async fn frame_at(&mut self, t: f64) -> TabsnapResult<Option<RgbaImage>> {
        let VideoMetadata { width, height, .. } = self.metadata().await?;
        let output = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-ss", &format!("{t:.3}"), "-i"])
            .arg(self.path())
            .args(["-frames:v", "1", "-f", "rawvideo", "-pix_fmt", "rgba", "pipe:1"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| TabsnapError::transcode(format!("failed to run `{}`: {e}", self.ffmpeg)))?;

        if !output.status.success() {
            return Err(TabsnapError::transcode(format!(
                "ffmpeg could not seek to {t:.3}s: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        if output.stdout.is_empty() {
            return Ok(None);
        }
        let len = output.stdout.len();
        RgbaImage::from_raw(width, height, output.stdout)
            .map(Some)
            .ok_or_else(|| {
                TabsnapError::transcode(format!(
                    "frame at {t:.3}s is {len} bytes, expected {width}x{height} RGBA"
                ))
            })
    }
}

#[derive(Debug, Deserialize)]
struct MediaInfo {
    #[serde(default)]
    streams: Vec<MediaStream>,
    format: Option<MediaFormat>,
}

#[derive(Debug, Deserialize)]
struct MediaStream {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct MediaFormat {
    duration: Option<String>,
}

/// Read `ffprobe -of json` output.
fn parse_media_info(json: &[u8]) -> TabsnapResult<VideoMetadata> {
    let info: MediaInfo = serde_json::from_slice(json)
        .map_err(|e| TabsnapError::transcode(format!("unreadable ffprobe output: {e}")))?;
    let stream = info
        .streams
        .first()
        .ok_or_else(|| TabsnapError::transcode("video has no video stream"))?;
    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(TabsnapError::transcode("video stream has no dimensions")),
    };
    let duration_secs = info
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .ok_or_else(|| TabsnapError::transcode("video has no usable duration"))?;
    Ok(VideoMetadata {
        duration_secs,
        width,
        height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_media_info() {
        let json = br#"{
            "programs": [],
            "streams": [{"width": 1080, "height": 2400}],
            "format": {"duration": "12.480000"}
        }"#;
        let meta = parse_media_info(json).unwrap();
        assert_eq!((meta.width, meta.height), (1080, 2400));
        assert!((meta.duration_secs - 12.48).abs() < 1e-9);
    }

    #[test]
    fn test_media_info_without_video_stream() {
        let json = br#"{"streams": [], "format": {"duration": "3.0"}}"#;
        assert!(matches!(
            parse_media_info(json),
            Err(TabsnapError::Transcode { .. })
        ));
    }

    #[test]
    fn test_malformed_media_info_is_a_transcode_error() {
        assert!(matches!(
            parse_media_info(b"not json"),
            Err(TabsnapError::Transcode { .. })
        ));
    }

    #[tokio::test]
    async fn test_temp_copy_is_removed_on_drop() {
        let source = FfmpegVideoSource::from_bytes(b"not really mp4", &HostToolsConfig::default())
            .await
            .unwrap();
        let path = source.path().to_path_buf();
        assert!(path.exists());
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("tabsnap-video-") && name.ends_with(".mp4"));
        drop(source);
        assert!(!path.exists());
    }
}
