//! Streaming video decoder backed by a host `ffmpeg` process.
//!
//! Encoded chunks go to ffmpeg's stdin; ffmpeg writes one binary PPM image
//! per decoded frame to stdout, which a reader task turns into pooled RGBA
//! frames on the bounded frame channel.

use std::process::Stdio;
use std::time::Duration;

use tabsnap_common::error::{TabsnapError, TabsnapResult};
use tabsnap_device_core::{
    DecodedFrame, DecoderFactory, FramePool, FrameSender, VideoCodec, VideoDecoder,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;

const READ_CHUNK: usize = 256 * 1024;

/// How long a closed decoder gets to flush before it is killed.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Opens ffmpeg decoders.
#[derive(Debug, Clone)]
pub struct FfmpegDecoderFactory {
    binary: String,
    pool_size: usize,
}

impl FfmpegDecoderFactory {
    pub fn new(binary: impl Into<String>, pool_size: usize) -> Self {
        Self {
            binary: binary.into(),
            pool_size: pool_size.max(1),
        }
    }

    fn args(codec: VideoCodec) -> [&'static str; 14] {
        [
            "-hide_banner",
            "-loglevel",
            "error",
            "-f",
            codec.as_str(),
            "-i",
            "pipe:0",
            "-f",
            "image2pipe",
            "-c:v",
            "ppm",
            "-flush_packets",
            "1",
            "pipe:1",
        ]
    }
}

impl DecoderFactory for FfmpegDecoderFactory {
    fn open(&self, codec: VideoCodec, frames: FrameSender) -> TabsnapResult<Box<dyn VideoDecoder>> {
        let mut child = Command::new(&self.binary)
            .args(Self::args(codec))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                TabsnapError::decoder_init(format!("failed to start `{}`: {e}", self.binary))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TabsnapError::decoder_init("decoder stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TabsnapError::decoder_init("decoder stdout not captured"))?;

        let pool = FramePool::new(self.pool_size);
        let reader = tokio::spawn(read_frames(stdout, frames, pool));
        tracing::debug!(codec = codec.as_str(), pid = ?child.id(), "Decoder started");

        Ok(Box::new(FfmpegDecoder {
            child: Some(child),
            stdin: Some(stdin),
            reader: Some(reader),
        }))
    }
}

struct FfmpegDecoder {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    reader: Option<JoinHandle<()>>,
}

#[async_trait::async_trait]
impl VideoDecoder for FfmpegDecoder {
    async fn push(&mut self, chunk: &[u8]) -> TabsnapResult<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| TabsnapError::decoder_init("decoder already closed"))?;
        stdin.write_all(chunk).await?;
        Ok(())
    }

    async fn close(&mut self) -> TabsnapResult<()> {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                Ok(Ok(status)) => tracing::debug!(%status, "Decoder exited"),
                Ok(Err(e)) => tracing::warn!(error = %e, "Failed to wait for decoder"),
                Err(_) => {
                    tracing::debug!("Decoder slow to exit; killing");
                    child.kill().await?;
                }
            }
        }
        if let Some(reader) = self.reader.take() {
            if let Err(e) = reader.await {
                tracing::warn!(error = %e, "Decoder reader task failed");
            }
        }
        Ok(())
    }
}

/// Turn ffmpeg's PPM output into frames. Keeps draining after the renderer
/// hangs up so ffmpeg never blocks on a full pipe.
async fn read_frames(mut stdout: impl AsyncRead + Unpin, frames: FrameSender, pool: FramePool) {
    let mut parser = PpmParser::default();
    let mut buf = vec![0u8; READ_CHUNK];
    let mut delivered = 0u64;
    let mut renderer_gone = false;
    loop {
        let n = match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "Decoder output failed");
                break;
            }
        };
        if renderer_gone {
            continue;
        }
        parser.feed(&buf[..n]);
        loop {
            match parser.next_frame(&pool) {
                Ok(Some(frame)) => {
                    if frames.send(frame).await.is_err() {
                        renderer_gone = true;
                        break;
                    }
                    delivered += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Malformed decoder output; dropping stream");
                    renderer_gone = true;
                    break;
                }
            }
        }
    }
    tracing::debug!(frames = delivered, "Decoder output ended");
}

/// Incremental parser for a stream of binary (P6) PPM images.
#[derive(Debug, Default)]
pub struct PpmParser {
    buf: Vec<u8>,
}

struct PpmHeader {
    width: u32,
    height: u32,
    len: usize,
}

impl PpmParser {
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete image as an RGBA frame, or `None` until more bytes arrive.
    pub fn next_frame(&mut self, pool: &FramePool) -> Result<Option<DecodedFrame>, String> {
        let Some(header) = parse_header(&self.buf)? else {
            return Ok(None);
        };
        let pixels = header.width as usize * header.height as usize;
        let end = header.len + pixels * 3;
        if self.buf.len() < end {
            return Ok(None);
        }

        let mut rgba = pool.take(pixels * 4);
        for (dst, src) in rgba
            .chunks_exact_mut(4)
            .zip(self.buf[header.len..end].chunks_exact(3))
        {
            dst[..3].copy_from_slice(src);
            dst[3] = 0xff;
        }
        self.buf.drain(..end);
        Ok(Some(DecodedFrame::pooled(
            header.width,
            header.height,
            rgba,
            pool.clone(),
        )))
    }

    /// Bytes received but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// `P6 <width> <height> <maxval>` followed by exactly one whitespace byte.
fn parse_header(buf: &[u8]) -> Result<Option<PpmHeader>, String> {
    if buf.len() < 2 {
        return Ok(None);
    }
    if &buf[..2] != b"P6" {
        return Err("expected a binary PPM image".to_string());
    }

    let mut pos = 2;
    let mut values = [0u32; 3];
    for value in values.iter_mut() {
        loop {
            match buf.get(pos) {
                None => return Ok(None),
                Some(b'#') => {
                    while buf.get(pos).is_some_and(|&b| b != b'\n') {
                        pos += 1;
                    }
                }
                Some(b) if b.is_ascii_whitespace() => pos += 1,
                Some(_) => break,
            }
        }
        let start = pos;
        while buf.get(pos).is_some_and(|b| b.is_ascii_digit()) {
            pos += 1;
        }
        if pos == buf.len() {
            return Ok(None);
        }
        if pos == start {
            return Err(format!("bad PPM header byte at offset {pos}"));
        }
        *value = std::str::from_utf8(&buf[start..pos])
            .ok()
            .and_then(|digits| digits.parse().ok())
            .ok_or_else(|| "PPM header value out of range".to_string())?;
    }

    match buf.get(pos) {
        None => return Ok(None),
        Some(b) if b.is_ascii_whitespace() => pos += 1,
        Some(_) => return Err("PPM header not terminated".to_string()),
    }

    let [width, height, maxval] = values;
    if maxval == 0 || maxval > 255 {
        return Err(format!("unsupported PPM maxval {maxval}"));
    }
    Ok(Some(PpmHeader {
        width,
        height,
        len: pos,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ppm(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
        let mut out = format!("P6\n{width} {height}\n255\n").into_bytes();
        for _ in 0..width * height {
            out.extend_from_slice(&rgb);
        }
        out
    }

    #[test]
    fn test_parses_frames_split_across_reads() {
        let pool = FramePool::new(2);
        let mut stream = ppm(2, 1, [10, 20, 30]);
        stream.extend(ppm(1, 1, [1, 2, 3]));

        let mut parser = PpmParser::default();
        parser.feed(&stream[..5]);
        assert!(parser.next_frame(&pool).unwrap().is_none());
        parser.feed(&stream[5..]);

        let first = parser.next_frame(&pool).unwrap().unwrap();
        assert_eq!((first.display_width(), first.display_height()), (2, 1));
        assert_eq!(first.pixels(), &[10, 20, 30, 255, 10, 20, 30, 255]);

        let second = parser.next_frame(&pool).unwrap().unwrap();
        assert_eq!(second.pixels(), &[1, 2, 3, 255]);
        assert!(parser.next_frame(&pool).unwrap().is_none());
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn test_header_with_comment() {
        let mut parser = PpmParser::default();
        parser.feed(b"P6 # made by ffmpeg\n1 1 255\n\x01\x02\x03");
        let frame = parser.next_frame(&FramePool::new(1)).unwrap().unwrap();
        assert_eq!(frame.pixels(), &[1, 2, 3, 255]);
    }

    #[test]
    fn test_rejects_other_formats() {
        let mut parser = PpmParser::default();
        parser.feed(b"P3\n1 1\n255\n");
        assert!(parser.next_frame(&FramePool::new(1)).is_err());

        let mut parser = PpmParser::default();
        parser.feed(b"P6\n1 1\n65535\n");
        assert!(parser.next_frame(&FramePool::new(1)).is_err());
    }

    #[test]
    fn test_closed_frames_refill_pool() {
        let pool = FramePool::new(2);
        let mut parser = PpmParser::default();
        parser.feed(&ppm(4, 4, [0, 0, 0]));
        let frame = parser.next_frame(&pool).unwrap().unwrap();
        assert_eq!(pool.available(), 0);
        frame.close();
        assert_eq!(pool.available(), 1);
    }
}
