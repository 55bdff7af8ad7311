//! Serialized shell command execution against the device.
//!
//! The device shell multiplexes one reply stream at a time, so the channel
//! admits a single command at once. A second caller waits in line until the
//! first command's output stream has been dropped.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tabsnap_common::error::{TabsnapError, TabsnapResult};
use tabsnap_device_core::{stream_error, ByteStream, DeviceSession, RemoteProcess};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Read granularity when draining device streams.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Output of one command. The channel stays occupied until this is dropped.
pub struct CommandStream {
    command: String,
    inner: ByteStream,
    _slot: OwnedMutexGuard<()>,
}

impl CommandStream {
    /// The command line that produced this stream.
    pub fn command(&self) -> &str {
        &self.command
    }
}

impl AsyncRead for CommandStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

/// One-at-a-time command runner bound to a session.
#[derive(Clone)]
pub struct CommandChannel {
    session: Arc<DeviceSession>,
    slot: Arc<Mutex<()>>,
}

impl CommandChannel {
    pub fn new(session: Arc<DeviceSession>) -> Self {
        Self {
            session,
            slot: Arc::new(Mutex::new(())),
        }
    }

    pub fn session(&self) -> &Arc<DeviceSession> {
        &self.session
    }

    /// Start `cmdline` and hand back its output stream.
    pub async fn run(&self, cmdline: &str) -> TabsnapResult<CommandStream> {
        let slot = self.slot.clone().lock_owned().await;
        let transport = self.session.transport()?;
        tracing::debug!(command = cmdline, "Running device command");
        let inner = transport
            .run_command(cmdline)
            .await
            .map_err(|e| self.observe(e))?;
        Ok(CommandStream {
            command: cmdline.to_string(),
            inner,
            _slot: slot,
        })
    }

    /// Run `cmdline` and concatenate its whole output. A command that
    /// exits without output yields an empty buffer.
    pub async fn run_bytes(&self, cmdline: &str) -> TabsnapResult<Vec<u8>> {
        let mut stream = self.run(cmdline).await?;
        let bytes = collect(&mut stream).await.map_err(|e| {
            self.observe(stream_error(e, |m| TabsnapError::command_failed(cmdline, m)))
        })?;
        tracing::debug!(command = cmdline, bytes = bytes.len(), "Device command finished");
        Ok(bytes)
    }

    /// Run `cmdline` and decode its output as text.
    pub async fn run_text(&self, cmdline: &str) -> TabsnapResult<String> {
        let bytes = self.run_bytes(cmdline).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Start `cmdline` in the background. Returns once the remote process
    /// is spawned; the channel is free again immediately after.
    pub async fn spawn(&self, cmdline: &str) -> TabsnapResult<Box<dyn RemoteProcess>> {
        let _slot = self.slot.lock().await;
        let transport = self.session.transport()?;
        tracing::debug!(command = cmdline, "Spawning background device command");
        transport.spawn(cmdline).await.map_err(|e| self.observe(e))
    }

    /// Note a transport loss on the session before passing the error on.
    pub(crate) fn observe(&self, err: TabsnapError) -> TabsnapError {
        if err.is_session_fatal() {
            self.session.mark_lost(&err.to_string());
        }
        err
    }
}

/// Drain a stream chunk by chunk into one buffer.
pub async fn collect<R: AsyncRead + Unpin>(stream: &mut R) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut chunk = vec![0u8; CHUNK_SIZE];
    let mut chunks = 0usize;
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&chunk[..n]);
        chunks += 1;
    }
    tracing::trace!(chunks, bytes = out.len(), "Stream drained");
    Ok(out)
}
