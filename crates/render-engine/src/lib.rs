//! TabSnap Render Engine
//!
//! Client-side post-processing of captures. Nothing here touches the
//! device; every operation works on artifact bytes.
//!
//! ```text
//! Image ──▶ compose_frame(style) ──▶ PNG ─────────┐
//!                                                  ├──▶ save_artifact / copy_to_clipboard
//! Video ──▶ VideoSource ──▶ GifTranscoder ──▶ GIF ─┘
//!             (seek, sample)   (scale, quantize)
//! ```

pub mod compositor;
pub mod export;
pub mod transcode;
pub mod video;

pub use compositor::{compose_frame, compose_image, frame_geometry, FrameGeometry, FrameStyle};
pub use export::*;
pub use transcode::{sample_instants, GifJob, GifOptions, GifStatus, GifTranscoder};
pub use video::{FfmpegVideoSource, VideoMetadata, VideoSource};
