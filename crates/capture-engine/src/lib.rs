//! TabSnap Capture Engine
//!
//! Orchestrates screenshots, screen recordings, wireless setup, and live
//! mirroring for one attached device. All device traffic goes through a
//! single serialized command channel.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │               CaptureController                │
//! │   Idle ⇄ Screenshot   Idle ⇄ Recording         │
//! │   Idle ⇄ Mirroring                             │
//! │  ┌──────────────┐ ┌────────────┐ ┌───────────┐ │
//! │  │CommandChannel│ │FileTransfer│ │  Mirror   │ │
//! │  │ (one at once)│ │ pull/push  │ │ Pipeline  │ │
//! │  └──────┬───────┘ └─────┬──────┘ └─────┬─────┘ │
//! │         ▼               ▼              ▼       │
//! │  ┌───────────────────────────────────────────┐ │
//! │  │        DeviceSession (Transport)          │ │
//! │  └───────────────────────────────────────────┘ │
//! └───────────────────────────────────────────────┘
//! ```

pub mod artifact;
pub mod channel;
pub mod controller;
pub mod mirror;
pub mod transfer;
pub mod wireless;

pub use artifact::*;
pub use channel::{CommandChannel, CommandStream};
pub use controller::*;
pub use mirror::{
    BytesPayload, FilePayload, MirrorCanvas, MirrorConfig, MirrorPipeline, MirrorSession,
    MirrorView, PayloadSource,
};
pub use transfer::FileTransfer;
pub use wireless::{parse_source_address, WirelessEndpoint};
