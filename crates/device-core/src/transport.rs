//! Transport contract: the opaque link to one attached device.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tabsnap_common::error::{TabsnapError, TabsnapResult};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;

/// An incremental byte stream from the device. End of stream is the done
/// signal; the consumer concatenates chunks itself.
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// A byte stream that yields nothing.
pub fn empty_stream() -> ByteStream {
    Box::new(tokio::io::empty())
}

/// A stream over an owned buffer.
pub fn stream_from_bytes(bytes: Vec<u8>) -> ByteStream {
    Box::new(std::io::Cursor::new(bytes))
}

/// Producer half of [`chunk_stream`].
pub type ChunkSender = mpsc::Sender<io::Result<Vec<u8>>>;

/// A bounded chunk pipe: whatever is sent on the returned sender is read
/// back, in order, from the returned stream. Dropping the sender ends the
/// stream; sending an `Err` surfaces it to the reader.
pub fn chunk_stream(capacity: usize) -> (ChunkSender, ByteStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let reader = ChunkReader {
        rx,
        pending: Vec::new(),
        offset: 0,
    };
    (tx, Box::new(reader))
}

struct ChunkReader {
    rx: mpsc::Receiver<io::Result<Vec<u8>>>,
    pending: Vec<u8>,
    offset: usize,
}

impl AsyncRead for ChunkReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            if self.offset < self.pending.len() {
                let n = buf.remaining().min(self.pending.len() - self.offset);
                let start = self.offset;
                buf.put_slice(&self.pending[start..start + n]);
                self.offset += n;
                return Poll::Ready(Ok(()));
            }
            match self.rx.poll_recv(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    self.pending = chunk;
                    self.offset = 0;
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Err(e)),
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Map a stream read failure: `NotConnected` means the link is gone,
/// anything else is charged to the operation.
pub fn stream_error(err: io::Error, otherwise: impl FnOnce(String) -> TabsnapError) -> TabsnapError {
    if err.kind() == io::ErrorKind::NotConnected {
        TabsnapError::disconnected(err.to_string())
    } else {
        otherwise(err.to_string())
    }
}

/// Handle to a remote process started in the background.
#[async_trait::async_trait]
pub trait RemoteProcess: Send {
    /// Resolve once the remote process has exited.
    async fn wait(&mut self) -> TabsnapResult<()>;

    /// Release the local end of the process. Safe to call after exit.
    async fn kill(&mut self) -> TabsnapResult<()>;
}

/// Operations the device link must provide.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Human-readable identifier (serial, address).
    fn name(&self) -> &str;

    /// Run a shell command and stream its standard output.
    async fn run_command(&self, cmdline: &str) -> TabsnapResult<ByteStream>;

    /// Start a shell command without waiting for it to finish.
    async fn spawn(&self, cmdline: &str) -> TabsnapResult<Box<dyn RemoteProcess>>;

    /// Stream a remote file's contents.
    async fn pull_file(&self, path: &str) -> TabsnapResult<ByteStream>;

    /// Write a stream to a remote file with the given permission bits.
    /// Returns the number of bytes written.
    async fn push_file(&self, path: &str, source: ByteStream, mode: u32) -> TabsnapResult<u64>;

    /// Whether [`Transport::set_network_listener`] is implemented.
    fn supports_network_listener(&self) -> bool {
        false
    }

    /// Ask the device daemon to restart listening on a TCP port.
    async fn set_network_listener(&self, port: u16) -> TabsnapResult<()> {
        Err(TabsnapError::unsupported(format!(
            "{} cannot switch to a network listener on port {port}",
            self.name()
        )))
    }

    /// Connect to a device-side abstract socket.
    async fn open_socket(&self, name: &str) -> TabsnapResult<ByteStream>;

    /// Tear the link down.
    async fn close(&self) -> TabsnapResult<()>;
}

/// Establishes a [`Transport`] to a device.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Perform the handshake. Fails with `ConnectionFailed`,
    /// `ConnectionRejected`, or `TransportUnavailable`.
    async fn connect(&self) -> TabsnapResult<Box<dyn Transport>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_chunk_stream_preserves_order() {
        let (tx, mut stream) = chunk_stream(4);
        tokio::spawn(async move {
            for chunk in [b"ab".to_vec(), Vec::new(), b"cde".to_vec()] {
                tx.send(Ok(chunk)).await.unwrap();
            }
        });

        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"abcde");
    }

    #[tokio::test]
    async fn test_chunk_stream_surfaces_errors() {
        let (tx, mut stream) = chunk_stream(2);
        tx.send(Ok(b"x".to_vec())).await.unwrap();
        tx.send(Err(io::Error::new(io::ErrorKind::NotConnected, "device offline")))
            .await
            .unwrap();
        drop(tx);

        let mut out = Vec::new();
        let err = stream.read_to_end(&mut out).await.unwrap_err();
        let mapped = stream_error(err, |m| TabsnapError::command_failed("screencap -p", m));
        assert!(mapped.is_session_fatal());
    }
}
