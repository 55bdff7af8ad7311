//! TabSnap Common Utilities
//!
//! Shared infrastructure for all TabSnap crates:
//! - Error taxonomy and result aliases
//! - Artifact file naming
//! - Tracing/logging initialization
//! - Configuration loading
//! - Host tool lookup

pub mod config;
pub mod error;
pub mod logging;
pub mod naming;
pub mod tools;

pub use config::*;
pub use error::*;
pub use naming::*;
