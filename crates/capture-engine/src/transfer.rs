//! Whole-file moves between host memory and the device filesystem.

use std::sync::Arc;

use tabsnap_common::error::{TabsnapError, TabsnapResult};
use tabsnap_device_core::{stream_error, ByteStream, DeviceSession};

use crate::channel::collect;

/// Pulls and pushes files over the session's transport.
///
/// Neither direction deletes anything; removing a pulled file is the
/// caller's job.
#[derive(Clone)]
pub struct FileTransfer {
    session: Arc<DeviceSession>,
}

impl FileTransfer {
    pub fn new(session: Arc<DeviceSession>) -> Self {
        Self { session }
    }

    /// Read `remote_path` into memory.
    pub async fn pull(&self, remote_path: &str) -> TabsnapResult<Vec<u8>> {
        let transport = self.session.transport()?;
        tracing::debug!(path = remote_path, "Pulling remote file");
        let mut stream = transport
            .pull_file(remote_path)
            .await
            .map_err(|e| self.failed(remote_path, e))?;
        let bytes = collect(&mut stream).await.map_err(|e| {
            let err = stream_error(e, |m| TabsnapError::file_transfer(remote_path, m));
            self.failed(remote_path, err)
        })?;
        tracing::info!(path = remote_path, bytes = bytes.len(), "Pulled remote file");
        Ok(bytes)
    }

    /// Write `source` to `remote_path` with permission bits `mode`.
    pub async fn push(&self, remote_path: &str, source: ByteStream, mode: u32) -> TabsnapResult<u64> {
        let transport = self.session.transport()?;
        tracing::debug!(path = remote_path, mode = %format!("{mode:o}"), "Pushing file");
        let written = transport
            .push_file(remote_path, source, mode)
            .await
            .map_err(|e| self.failed(remote_path, e))?;
        tracing::info!(path = remote_path, bytes = written, "Pushed file");
        Ok(written)
    }

    /// Keep disconnects and existing transfer errors as they are; charge
    /// everything else to the transfer.
    fn failed(&self, remote_path: &str, err: TabsnapError) -> TabsnapError {
        match err {
            TabsnapError::Disconnected { .. } => {
                self.session.mark_lost(&err.to_string());
                err
            }
            TabsnapError::FileTransferFailed { .. } => err,
            other => TabsnapError::file_transfer(remote_path, other.to_string()),
        }
    }
}
