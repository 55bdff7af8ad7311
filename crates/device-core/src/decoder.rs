//! Video decoder contract used by live mirroring.
//!
//! A decoder accepts the encoded stream in order and hands decoded frames
//! to the renderer over a bounded channel. Frame buffers come from a small
//! pool owned by the decoder; a frame returns its buffer to the pool when it
//! is closed or dropped, so the renderer must let go of each frame as soon
//! as it has been drawn.

use std::sync::{Arc, Mutex};

use tabsnap_common::error::TabsnapResult;
use tokio::sync::mpsc;

/// Codec identifier attached to the encoded byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
}

impl VideoCodec {
    /// Demuxer name understood by host decoders.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::H264 => "h264",
        }
    }
}

/// Recycled RGBA buffers shared between a decoder and its frames.
#[derive(Debug, Clone, Default)]
pub struct FramePool {
    free: Arc<Mutex<Vec<Vec<u8>>>>,
    capacity: usize,
}

impl FramePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Arc::new(Mutex::new(Vec::with_capacity(capacity))),
            capacity,
        }
    }

    /// Take a zeroed buffer of `len` bytes, reusing a released one if possible.
    pub fn take(&self, len: usize) -> Vec<u8> {
        let reused = self.free.lock().unwrap_or_else(|e| e.into_inner()).pop();
        let mut buffer = reused.unwrap_or_default();
        buffer.clear();
        buffer.resize(len, 0);
        buffer
    }

    /// Number of buffers waiting for reuse.
    pub fn available(&self) -> usize {
        self.free.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn give_back(&self, buffer: Vec<u8>) {
        let mut free = self.free.lock().unwrap_or_else(|e| e.into_inner());
        if free.len() < self.capacity {
            free.push(buffer);
        }
    }
}

/// One decoded picture, in RGBA8.
#[derive(Debug)]
pub struct DecodedFrame {
    display_width: u32,
    display_height: u32,
    pixels: Vec<u8>,
    pool: Option<FramePool>,
}

impl DecodedFrame {
    /// A frame that does not belong to any pool.
    pub fn new(display_width: u32, display_height: u32, pixels: Vec<u8>) -> Self {
        Self {
            display_width,
            display_height,
            pixels,
            pool: None,
        }
    }

    /// A frame whose buffer goes back to `pool` once released.
    pub fn pooled(display_width: u32, display_height: u32, pixels: Vec<u8>, pool: FramePool) -> Self {
        Self {
            display_width,
            display_height,
            pixels,
            pool: Some(pool),
        }
    }

    pub fn display_width(&self) -> u32 {
        self.display_width
    }

    pub fn display_height(&self) -> u32 {
        self.display_height
    }

    /// Row-major RGBA pixels, `width * height * 4` bytes.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Release the frame's buffer.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for DecodedFrame {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.give_back(std::mem::take(&mut self.pixels));
        }
    }
}

/// Sending half of the decoder → renderer handoff.
pub type FrameSender = mpsc::Sender<DecodedFrame>;

/// A running decoder instance.
#[async_trait::async_trait]
pub trait VideoDecoder: Send {
    /// Feed the next chunk of the encoded stream.
    async fn push(&mut self, chunk: &[u8]) -> TabsnapResult<()>;

    /// Stop decoding and release every resource. Safe to call twice.
    async fn close(&mut self) -> TabsnapResult<()>;
}

/// Creates decoders.
pub trait DecoderFactory: Send + Sync {
    /// Open a decoder for `codec` that delivers frames, in presentation
    /// order, into `frames`. Fails with `DecoderInit`.
    fn open(&self, codec: VideoCodec, frames: FrameSender) -> TabsnapResult<Box<dyn VideoDecoder>>;
}
