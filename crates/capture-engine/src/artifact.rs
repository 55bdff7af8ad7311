//! Capture artifacts and their corruption heuristics.

use tabsnap_common::error::{ArtifactKind, TabsnapError, TabsnapResult};

/// Smallest screenshot accepted as a real PNG.
pub const MIN_IMAGE_BYTES: usize = 100;

/// Smallest recording accepted as a playable MP4.
pub const MIN_VIDEO_BYTES: usize = 1024;

/// The product of a capture. Immutable; the next capture replaces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureArtifact {
    Image { bytes: Vec<u8> },
    Video { bytes: Vec<u8> },
}

impl CaptureArtifact {
    /// Wrap screenshot bytes, rejecting truncated captures.
    pub fn image(bytes: Vec<u8>) -> TabsnapResult<Self> {
        check_size(ArtifactKind::Image, bytes.len(), MIN_IMAGE_BYTES)?;
        Ok(Self::Image { bytes })
    }

    /// Wrap recording bytes, rejecting truncated files.
    pub fn video(bytes: Vec<u8>) -> TabsnapResult<Self> {
        check_size(ArtifactKind::Video, bytes.len(), MIN_VIDEO_BYTES)?;
        Ok(Self::Video { bytes })
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Image { bytes } | Self::Video { bytes } => bytes,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Image { bytes } | Self::Video { bytes } => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }

    pub fn kind(&self) -> ArtifactKind {
        match self {
            Self::Image { .. } => ArtifactKind::Image,
            Self::Video { .. } => ArtifactKind::Video,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Image { .. } => "image/png",
            Self::Video { .. } => "video/mp4",
        }
    }
}

fn check_size(kind: ArtifactKind, len: usize, min: usize) -> TabsnapResult<()> {
    if len < min {
        tracing::warn!(%kind, len, min, "Rejecting undersized artifact");
        return Err(TabsnapError::ArtifactTooSmall { kind, len, min });
    }
    Ok(())
}
