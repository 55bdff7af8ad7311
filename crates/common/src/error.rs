//! Error types shared across TabSnap crates.

/// Which kind of artifact failed a size check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Image,
    Video,
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Image => f.write_str("image"),
            Self::Video => f.write_str("video"),
        }
    }
}

/// Top-level error type for TabSnap operations.
#[derive(Debug, thiserror::Error)]
pub enum TabsnapError {
    #[error("Device transport unavailable: {message}")]
    TransportUnavailable { message: String },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Connection rejected: {message}")]
    ConnectionRejected { message: String },

    #[error("Device disconnected: {message}")]
    Disconnected { message: String },

    #[error("Command `{command}` failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("Received empty or too small {kind} (size: {len} bytes, expected at least {min})")]
    ArtifactTooSmall {
        kind: ArtifactKind,
        len: usize,
        min: usize,
    },

    #[error("File transfer failed for {path}: {message}")]
    FileTransferFailed { path: String, message: String },

    #[error("Unsupported operation: {message}")]
    UnsupportedOperation { message: String },

    #[error("Wireless setup failed: {message}")]
    WirelessSetupFailed { message: String },

    #[error("Decoder initialization failed: {message}")]
    DecoderInit { message: String },

    #[error("Transcode error: {message}")]
    Transcode { message: String },

    #[error("Cannot {requested} while {current}")]
    InvalidState { current: String, requested: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using TabsnapError.
pub type TabsnapResult<T> = Result<T, TabsnapError>;

impl TabsnapError {
    pub fn transport_unavailable(msg: impl Into<String>) -> Self {
        Self::TransportUnavailable {
            message: msg.into(),
        }
    }

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            message: msg.into(),
        }
    }

    pub fn connection_rejected(msg: impl Into<String>) -> Self {
        Self::ConnectionRejected {
            message: msg.into(),
        }
    }

    pub fn disconnected(msg: impl Into<String>) -> Self {
        Self::Disconnected {
            message: msg.into(),
        }
    }

    pub fn command_failed(command: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::CommandFailed {
            command: command.into(),
            message: msg.into(),
        }
    }

    pub fn file_transfer(path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::FileTransferFailed {
            path: path.into(),
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            message: msg.into(),
        }
    }

    pub fn wireless(msg: impl Into<String>) -> Self {
        Self::WirelessSetupFailed {
            message: msg.into(),
        }
    }

    pub fn decoder_init(msg: impl Into<String>) -> Self {
        Self::DecoderInit {
            message: msg.into(),
        }
    }

    pub fn transcode(msg: impl Into<String>) -> Self {
        Self::Transcode {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn invalid_state(current: impl std::fmt::Display, requested: impl Into<String>) -> Self {
        Self::InvalidState {
            current: current.to_string(),
            requested: requested.into(),
        }
    }

    /// Whether this error means the device transport is gone and the whole
    /// session must be torn down.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Self::Disconnected { .. })
    }
}
