//! Device session: exclusive owner of one transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tabsnap_common::error::{TabsnapError, TabsnapResult};

use crate::transport::{Connector, Transport};

/// Link state of a [`DeviceSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// A live connection to one device.
///
/// The session owns its transport exclusively. The capture controller, the
/// mirror pipeline, and the wireless helper borrow it through an `Arc` and
/// observe [`ConnectionState::Disconnected`] once the link is gone.
pub struct DeviceSession {
    transport: Box<dyn Transport>,
    state: Mutex<ConnectionState>,
    /// Set once `close` has been issued, independent of link loss.
    closed: AtomicBool,
}

impl DeviceSession {
    /// Run the connector's handshake and wrap the resulting transport.
    pub async fn connect(connector: &dyn Connector) -> TabsnapResult<Arc<Self>> {
        tracing::info!(state = ?ConnectionState::Connecting, "Connecting to device");
        let transport = match connector.connect().await {
            Ok(transport) => transport,
            Err(e) => {
                tracing::warn!(error = %e, "Device handshake failed");
                return Err(e);
            }
        };
        tracing::info!(device = transport.name(), "Device connected");
        Ok(Arc::new(Self::from_transport(transport)))
    }

    /// Wrap an already connected transport.
    pub fn from_transport(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            state: Mutex::new(ConnectionState::Connected),
            closed: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.lock_state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Identifier of the underlying transport.
    pub fn name(&self) -> &str {
        self.transport.name()
    }

    /// Borrow the transport. Fails once the session is disconnected.
    pub fn transport(&self) -> TabsnapResult<&dyn Transport> {
        match self.state() {
            ConnectionState::Connected => Ok(self.transport.as_ref()),
            state => Err(TabsnapError::disconnected(format!(
                "session {} is {state:?}",
                self.name()
            ))),
        }
    }

    /// Record that the transport failed underneath us.
    pub fn mark_lost(&self, reason: &str) {
        let mut state = self.lock_state();
        if *state != ConnectionState::Disconnected {
            tracing::warn!(device = self.transport.name(), reason, "Device link lost");
            *state = ConnectionState::Disconnected;
        }
    }

    /// Close the transport, including after the link was lost. Calling
    /// this more than once is a no-op.
    pub async fn disconnect(&self) -> TabsnapResult<()> {
        *self.lock_state() = ConnectionState::Disconnected;
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!(device = self.transport.name(), "Disconnecting device");
        self.transport.close().await
    }

    fn lock_state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("device", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{empty_stream, ByteStream, RemoteProcess};
    use std::sync::atomic::AtomicUsize;

    struct CountingTransport {
        closes: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Transport for CountingTransport {
        fn name(&self) -> &str {
            "emulator-5554"
        }

        async fn run_command(&self, _cmdline: &str) -> TabsnapResult<ByteStream> {
            Ok(empty_stream())
        }

        async fn spawn(&self, cmdline: &str) -> TabsnapResult<Box<dyn RemoteProcess>> {
            Err(TabsnapError::command_failed(cmdline, "not scripted"))
        }

        async fn pull_file(&self, _path: &str) -> TabsnapResult<ByteStream> {
            Ok(empty_stream())
        }

        async fn push_file(&self, _path: &str, _source: ByteStream, _mode: u32) -> TabsnapResult<u64> {
            Ok(0)
        }

        async fn open_socket(&self, _name: &str) -> TabsnapResult<ByteStream> {
            Ok(empty_stream())
        }

        async fn close(&self) -> TabsnapResult<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct RejectingConnector;

    #[async_trait::async_trait]
    impl Connector for RejectingConnector {
        async fn connect(&self) -> TabsnapResult<Box<dyn Transport>> {
            Err(TabsnapError::connection_rejected("user cancelled"))
        }
    }

    fn session() -> (DeviceSession, Arc<AtomicUsize>) {
        let closes = Arc::new(AtomicUsize::new(0));
        let transport = CountingTransport {
            closes: closes.clone(),
        };
        (DeviceSession::from_transport(Box::new(transport)), closes)
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (session, closes) = session();
        assert!(session.is_connected());

        session.disconnect().await.unwrap();
        session.disconnect().await.unwrap();

        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transport_unavailable_after_loss() {
        let (session, _) = session();
        assert!(session.transport().is_ok());

        session.mark_lost("usb reset");

        let err = session.transport().err().unwrap();
        assert!(err.is_session_fatal());
    }

    #[tokio::test]
    async fn test_lost_session_still_closes_transport_once() {
        let (session, closes) = session();
        session.mark_lost("usb reset");

        session.disconnect().await.unwrap();
        session.disconnect().await.unwrap();

        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejected_handshake_propagates() {
        let err = DeviceSession::connect(&RejectingConnector).await.unwrap_err();
        assert!(matches!(err, TabsnapError::ConnectionRejected { .. }));
    }
}
