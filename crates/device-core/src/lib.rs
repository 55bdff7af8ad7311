//! TabSnap device core contracts.
//!
//! This crate contains the narrow interfaces the capture engine consumes
//! without coupling to a concrete device backend: the transport that runs
//! shell commands and moves files, the session that owns it, and the video
//! decoder used by live mirroring.

pub mod decoder;
pub mod session;
pub mod transport;

pub use decoder::*;
pub use session::*;
pub use transport::*;
