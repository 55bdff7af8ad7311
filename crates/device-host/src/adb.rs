//! Device transport backed by the host `adb` binary.
//!
//! Commands run through `adb exec-out`, which passes binary stdout through
//! untouched. Every call is its own `adb` process, so the transport holds no
//! socket of its own; the device link is whatever the adb server keeps.

use std::io;
use std::pin::Pin;
use std::process::{Output, Stdio};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tabsnap_common::config::HostToolsConfig;
use tabsnap_common::error::{TabsnapError, TabsnapResult};
use tabsnap_device_core::{chunk_stream, ByteStream, ChunkSender, Connector, RemoteProcess, Transport};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};

const READ_CHUNK: usize = 64 * 1024;

/// Chunks buffered between an `adb` process and its reader.
const STREAM_DEPTH: usize = 8;

/// Opens [`AdbTransport`]s after checking the device is attached and authorized.
#[derive(Debug, Clone)]
pub struct AdbConnector {
    binary: String,
    serial: Option<String>,
}

impl AdbConnector {
    pub fn new(tools: &HostToolsConfig) -> Self {
        Self {
            binary: tools.binary.clone(),
            serial: tools.serial.clone(),
        }
    }
}

#[async_trait::async_trait]
impl Connector for AdbConnector {
    async fn connect(&self) -> TabsnapResult<Box<dyn Transport>> {
        let transport = AdbTransport::new(self.binary.clone(), self.serial.clone());
        let output = transport
            .adb()
            .arg("get-state")
            .output()
            .await
            .map_err(|e| launch_error(&self.binary, e))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if output.status.success() && stdout == "device" {
            return Ok(Box::new(transport));
        }
        Err(classify_handshake(&stdout, &stderr))
    }
}

/// Map a failed `adb get-state` to the handshake error it stands for.
pub fn classify_handshake(stdout: &str, stderr: &str) -> TabsnapError {
    let text = if stderr.is_empty() { stdout } else { stderr };
    if text.contains("unauthorized") {
        TabsnapError::connection_rejected(
            "device has not authorized this computer; accept the USB debugging prompt",
        )
    } else if text.is_empty() {
        TabsnapError::connection_failed("no device attached")
    } else {
        TabsnapError::connection_failed(text.to_string())
    }
}

/// Whether adb's error output means the device itself went away.
pub fn is_link_error(stderr: &str) -> bool {
    const MARKERS: [&str; 4] = [
        "no devices/emulators found",
        "device offline",
        "device unauthorized",
        "error: closed",
    ];
    let lower = stderr.to_ascii_lowercase();
    MARKERS.iter().any(|marker| lower.contains(marker))
        || lower
            .lines()
            .any(|line| line.starts_with("error: device") && line.contains("not found"))
}

/// Single-quote `arg` for the device shell unless it is plainly safe.
pub fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+=:@%,".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

fn launch_error(binary: &str, err: io::Error) -> TabsnapError {
    if err.kind() == io::ErrorKind::NotFound {
        TabsnapError::transport_unavailable(format!("`{binary}` not found on PATH"))
    } else {
        TabsnapError::connection_failed(format!("failed to run `{binary}`: {err}"))
    }
}

/// A device reached through `adb`.
pub struct AdbTransport {
    binary: String,
    serial: Option<String>,
    name: String,
    /// Local ports forwarded to the device and not yet removed.
    forwards: Arc<Mutex<Vec<u16>>>,
}

impl AdbTransport {
    pub fn new(binary: String, serial: Option<String>) -> Self {
        let name = match &serial {
            Some(serial) => format!("adb:{serial}"),
            None => "adb".to_string(),
        };
        Self {
            binary,
            serial,
            name,
            forwards: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn adb(&self) -> Command {
        adb_command(&self.binary, self.serial.as_deref())
    }

    /// Run `adb <args>` to completion.
    async fn output(&self, args: &[&str]) -> TabsnapResult<Output> {
        self.adb()
            .args(args)
            .output()
            .await
            .map_err(|e| launch_error(&self.binary, e))
    }

    /// Stream stdout of `adb exec-out <cmdline>`.
    fn exec_out(&self, cmdline: &str) -> TabsnapResult<ByteStream> {
        let mut child = self
            .adb()
            .arg("exec-out")
            .arg(cmdline)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| launch_error(&self.binary, e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TabsnapError::command_failed(cmdline, "stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TabsnapError::command_failed(cmdline, "stderr not captured"))?;

        let (tx, stream) = chunk_stream(STREAM_DEPTH);
        tokio::spawn(forward_output(child, stdout, stderr, tx, cmdline.to_string()));
        Ok(stream)
    }

    fn forward_port(&self, port: u16) {
        lock_ports(&self.forwards).push(port);
    }

    /// Remove one forward now, whatever state it is in.
    async fn unforward(&self, port: u16) {
        lock_ports(&self.forwards).retain(|&p| p != port);
        remove_forward(&self.binary, self.serial.as_deref(), port).await;
    }

    /// Connect to a forwarded port and wait for the device side's greeting.
    async fn connect_forwarded(&self, name: &str, port: u16) -> TabsnapResult<TcpStream> {
        let mut stream = TcpStream::connect(("127.0.0.1", port))
            .await
            .map_err(|e| TabsnapError::command_failed("forward", e.to_string()))?;
        let mut first = [0u8; 1];
        stream
            .read_exact(&mut first)
            .await
            .map_err(|_| TabsnapError::command_failed("forward", format!("{name} is not listening yet")))?;
        Ok(stream)
    }

    fn failed(&self, what: &str, output: &Output) -> TabsnapError {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if is_link_error(&stderr) {
            TabsnapError::disconnected(stderr)
        } else {
            TabsnapError::command_failed(what, format!("{}: {stderr}", output.status))
        }
    }
}

#[async_trait::async_trait]
impl Transport for AdbTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run_command(&self, cmdline: &str) -> TabsnapResult<ByteStream> {
        self.exec_out(cmdline)
    }

    async fn spawn(&self, cmdline: &str) -> TabsnapResult<Box<dyn RemoteProcess>> {
        let child = self
            .adb()
            .arg("exec-out")
            .arg(cmdline)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| launch_error(&self.binary, e))?;
        tracing::debug!(command = cmdline, pid = ?child.id(), "Spawned background command");
        Ok(Box::new(AdbProcess {
            child,
            command: cmdline.to_string(),
        }))
    }

    async fn pull_file(&self, path: &str) -> TabsnapResult<ByteStream> {
        self.exec_out(&format!("cat {}", shell_quote(path)))
    }

    async fn push_file(&self, path: &str, mut source: ByteStream, mode: u32) -> TabsnapResult<u64> {
        let target = shell_quote(path);
        let mut child = self
            .adb()
            .arg("shell")
            .arg(format!("cat > {target}"))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| launch_error(&self.binary, e))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| TabsnapError::file_transfer(path, "stdin not captured"))?;
        let copied = tokio::io::copy(&mut source, &mut stdin).await;
        drop(stdin);

        let output = child.wait_with_output().await?;
        let written = copied.map_err(|e| TabsnapError::file_transfer(path, e.to_string()))?;
        if !output.status.success() {
            return Err(match self.failed("push", &output) {
                e @ TabsnapError::Disconnected { .. } => e,
                e => TabsnapError::file_transfer(path, e.to_string()),
            });
        }

        let chmod = format!("chmod {mode:o} {target}");
        let output = self.output(&["shell", &chmod]).await?;
        if !output.status.success() {
            return Err(self.failed(&chmod, &output));
        }
        tracing::debug!(path, bytes = written, "Pushed file over adb");
        Ok(written)
    }

    fn supports_network_listener(&self) -> bool {
        true
    }

    async fn set_network_listener(&self, port: u16) -> TabsnapResult<()> {
        let port_arg = port.to_string();
        let output = self.output(&["tcpip", &port_arg]).await?;
        if !output.status.success() {
            return Err(match self.failed("tcpip", &output) {
                e @ TabsnapError::Disconnected { .. } => e,
                e => TabsnapError::wireless(e.to_string()),
            });
        }
        tracing::info!(port, "adb daemon restarting in TCP mode");
        Ok(())
    }

    /// Forward a free local port to the device socket and connect to it.
    ///
    /// adb accepts the local connection before anything listens on the
    /// device, so the connection only counts once the device side has
    /// written its first byte. That byte is consumed here.
    async fn open_socket(&self, name: &str) -> TabsnapResult<ByteStream> {
        let spec = format!("localabstract:{name}");
        let output = self.output(&["forward", "tcp:0", &spec]).await?;
        if !output.status.success() {
            return Err(self.failed("forward", &output));
        }
        let port: u16 = String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse()
            .map_err(|_| TabsnapError::command_failed("forward", "adb did not report a port"))?;
        self.forward_port(port);

        match self.connect_forwarded(name, port).await {
            Ok(stream) => {
                tracing::debug!(socket = name, port, "Connected to device socket");
                Ok(Box::new(ForwardedStream {
                    stream,
                    _forward: ForwardGuard {
                        binary: self.binary.clone(),
                        serial: self.serial.clone(),
                        port,
                        forwards: self.forwards.clone(),
                    },
                }))
            }
            Err(e) => {
                self.unforward(port).await;
                Err(e)
            }
        }
    }

    async fn close(&self) -> TabsnapResult<()> {
        let ports: Vec<u16> = std::mem::take(&mut *lock_ports(&self.forwards));
        for port in ports {
            remove_forward(&self.binary, self.serial.as_deref(), port).await;
        }
        Ok(())
    }
}

fn adb_command(binary: &str, serial: Option<&str>) -> Command {
    let mut cmd = Command::new(binary);
    if let Some(serial) = serial {
        cmd.arg("-s").arg(serial);
    }
    cmd.stdin(Stdio::null()).kill_on_drop(true);
    cmd
}

fn lock_ports(ports: &Mutex<Vec<u16>>) -> std::sync::MutexGuard<'_, Vec<u16>> {
    ports.lock().unwrap_or_else(|e| e.into_inner())
}

/// `adb forward --remove tcp:<port>`; failures are only logged.
async fn remove_forward(binary: &str, serial: Option<&str>, port: u16) {
    let local = format!("tcp:{port}");
    match adb_command(binary, serial)
        .args(["forward", "--remove", &local])
        .output()
        .await
    {
        Ok(output) if output.status.success() => tracing::debug!(port, "Removed forward"),
        Ok(output) => tracing::debug!(
            port,
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "Could not remove forward"
        ),
        Err(e) => tracing::debug!(port, error = %e, "Could not remove forward"),
    }
}

/// Removes its forward when the socket stream is dropped.
struct ForwardGuard {
    binary: String,
    serial: Option<String>,
    port: u16,
    forwards: Arc<Mutex<Vec<u16>>>,
}

impl Drop for ForwardGuard {
    fn drop(&mut self) {
        // Without a runtime the port stays listed and `close` removes it.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let port = self.port;
        lock_ports(&self.forwards).retain(|&p| p != port);
        let binary = std::mem::take(&mut self.binary);
        let serial = self.serial.take();
        runtime.spawn(async move {
            remove_forward(&binary, serial.as_deref(), port).await;
        });
    }
}

/// A device socket reached through a local forward.
struct ForwardedStream {
    stream: TcpStream,
    _forward: ForwardGuard,
}

impl AsyncRead for ForwardedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

/// Pump a command's stdout into `tx`, then report how it exited.
///
/// A non-zero exit with no output becomes a read error on the stream;
/// adb's own "device gone" messages become `NotConnected`.
async fn forward_output(
    mut child: Child,
    mut stdout: impl AsyncRead + Unpin,
    mut stderr: impl AsyncRead + Unpin + Send + 'static,
    tx: ChunkSender,
    command: String,
) {
    let stderr_task = tokio::spawn(async move {
        let mut text = String::new();
        let _ = stderr.read_to_string(&mut text).await;
        text
    });

    let mut total = 0usize;
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                total += n;
                if tx.send(Ok(buf[..n].to_vec())).await.is_err() {
                    tracing::debug!(command = %command, "Reader went away; stopping command");
                    let _ = child.kill().await;
                    return;
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                let _ = child.kill().await;
                return;
            }
        }
    }

    let status = child.wait().await;
    let stderr = stderr_task.await.unwrap_or_default();
    let stderr = stderr.trim();
    let failure = match status {
        Ok(status) if status.success() => None,
        Ok(_) if is_link_error(stderr) => Some(io::Error::new(io::ErrorKind::NotConnected, stderr.to_string())),
        Ok(status) if total == 0 => Some(io::Error::other(if stderr.is_empty() {
            status.to_string()
        } else {
            stderr.to_string()
        })),
        Ok(status) => {
            tracing::debug!(command = %command, %status, bytes = total, "Command exited non-zero after output");
            None
        }
        Err(e) => Some(e),
    };
    if let Some(err) = failure {
        let _ = tx.send(Err(err)).await;
    }
}

/// A backgrounded `adb exec-out` process.
struct AdbProcess {
    child: Child,
    command: String,
}

#[async_trait::async_trait]
impl RemoteProcess for AdbProcess {
    async fn wait(&mut self) -> TabsnapResult<()> {
        let status = self.child.wait().await?;
        tracing::debug!(command = %self.command, %status, "Background command exited");
        Ok(())
    }

    async fn kill(&mut self) -> TabsnapResult<()> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        self.child.kill().await?;
        Ok(())
    }
}
