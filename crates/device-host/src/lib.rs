//! TabSnap Host Backend
//!
//! Concrete collaborators built on host tools:
//! - **adb:** device transport (commands, file transfer, TCP/IP switch, socket forwards)
//! - **ffmpeg:** streaming H.264 decoder for live mirroring
//! - **Capabilities:** tool detection and user guidance

pub mod adb;
pub mod ffmpeg;
pub mod permissions;

pub use adb::{AdbConnector, AdbTransport};
pub use ffmpeg::{FfmpegDecoderFactory, PpmParser};
pub use permissions::*;
