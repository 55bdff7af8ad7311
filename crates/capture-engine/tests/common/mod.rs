//! Scripted in-memory device used by the capture engine tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tabsnap_common::error::{TabsnapError, TabsnapResult};
use tabsnap_device_core::{
    chunk_stream, stream_from_bytes, ByteStream, DecodedFrame, DecoderFactory, DeviceSession,
    FramePool, FrameSender, RemoteProcess, Transport, VideoCodec, VideoDecoder,
};
use tokio::io::AsyncReadExt;

/// How the fake device answers one request.
#[derive(Debug, Clone)]
pub enum Reply {
    Bytes(Vec<u8>),
    /// Some bytes, then a read error.
    Truncated(Vec<u8>),
    Fail(String),
    Disconnect,
}

#[derive(Default)]
struct ScriptState {
    log: Vec<String>,
    commands: HashMap<String, Reply>,
    pulls: HashMap<String, Reply>,
    spawn_failure: Option<Reply>,
    socket_failures: usize,
    socket: Option<ByteStream>,
    listener: bool,
    pushed: HashMap<String, Vec<u8>>,
}

/// Shared handle to the fake device's script and request log.
#[derive(Clone, Default)]
pub struct Script {
    state: Arc<Mutex<ScriptState>>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_command(&self, command: &str, reply: Reply) -> &Self {
        self.lock().commands.insert(command.to_string(), reply);
        self
    }

    pub fn on_pull(&self, path: &str, reply: Reply) -> &Self {
        self.lock().pulls.insert(path.to_string(), reply);
        self
    }

    pub fn fail_spawn(&self, reply: Reply) -> &Self {
        self.lock().spawn_failure = Some(reply);
        self
    }

    pub fn with_listener(&self) -> &Self {
        self.lock().listener = true;
        self
    }

    /// Refuse the next `n` socket connections.
    pub fn refuse_sockets(&self, n: usize) -> &Self {
        self.lock().socket_failures = n;
        self
    }

    pub fn on_socket(&self, stream: ByteStream) -> &Self {
        self.lock().socket = Some(stream);
        self
    }

    pub fn log(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    pub fn saw(&self, entry: &str) -> bool {
        self.lock().log.iter().any(|e| e == entry)
    }

    pub fn count(&self, entry: &str) -> usize {
        self.lock().log.iter().filter(|e| e.as_str() == entry).count()
    }

    /// Position of `entry` in the log.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.lock().log.iter().position(|e| e == entry)
    }

    pub fn pushed(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().pushed.get(path).cloned()
    }

    fn record(&self, entry: String) {
        self.lock().log.push(entry);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap()
    }

    /// A connected session over this script.
    pub fn session(&self) -> Arc<DeviceSession> {
        Arc::new(DeviceSession::from_transport(Box::new(ScriptedTransport {
            script: self.clone(),
        })))
    }
}

fn into_stream(reply: Reply, on_fail: impl FnOnce(String) -> TabsnapError) -> TabsnapResult<ByteStream> {
    match reply {
        Reply::Bytes(bytes) => Ok(stream_from_bytes(bytes)),
        Reply::Truncated(bytes) => {
            let (tx, stream) = chunk_stream(2);
            tx.try_send(Ok(bytes)).unwrap();
            tx.try_send(Err(io::Error::new(io::ErrorKind::UnexpectedEof, "stream cut")))
                .unwrap();
            Ok(stream)
        }
        Reply::Fail(message) => Err(on_fail(message)),
        Reply::Disconnect => Err(TabsnapError::disconnected("device not found")),
    }
}

pub struct ScriptedTransport {
    script: Script,
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn run_command(&self, cmdline: &str) -> TabsnapResult<ByteStream> {
        self.script.record(format!("run:{cmdline}"));
        let reply = self.script.lock().commands.get(cmdline).cloned();
        into_stream(reply.unwrap_or(Reply::Bytes(Vec::new())), |m| {
            TabsnapError::command_failed(cmdline, m)
        })
    }

    async fn spawn(&self, cmdline: &str) -> TabsnapResult<Box<dyn RemoteProcess>> {
        self.script.record(format!("spawn:{cmdline}"));
        let failure = self.script.lock().spawn_failure.clone();
        match failure {
            Some(Reply::Disconnect) => Err(TabsnapError::disconnected("device not found")),
            Some(_) => Err(TabsnapError::command_failed(cmdline, "spawn refused")),
            None => Ok(Box::new(FakeProcess {
                script: self.script.clone(),
                name: cmdline.split_whitespace().next().unwrap_or_default().to_string(),
            })),
        }
    }

    async fn pull_file(&self, path: &str) -> TabsnapResult<ByteStream> {
        self.script.record(format!("pull:{path}"));
        let reply = self.script.lock().pulls.get(path).cloned();
        into_stream(
            reply.unwrap_or(Reply::Fail("No such file or directory".to_string())),
            |m| TabsnapError::file_transfer(path, m),
        )
    }

    async fn push_file(&self, path: &str, mut source: ByteStream, _mode: u32) -> TabsnapResult<u64> {
        self.script.record(format!("push:{path}"));
        let mut bytes = Vec::new();
        source.read_to_end(&mut bytes).await?;
        let len = bytes.len() as u64;
        self.script.lock().pushed.insert(path.to_string(), bytes);
        Ok(len)
    }

    fn supports_network_listener(&self) -> bool {
        self.script.lock().listener
    }

    async fn set_network_listener(&self, port: u16) -> TabsnapResult<()> {
        self.script.record(format!("listen:{port}"));
        Ok(())
    }

    async fn open_socket(&self, name: &str) -> TabsnapResult<ByteStream> {
        self.script.record(format!("socket:{name}"));
        let mut state = self.script.lock();
        if state.socket_failures > 0 {
            state.socket_failures -= 1;
            return Err(TabsnapError::command_failed("forward", "connection refused"));
        }
        state
            .socket
            .take()
            .ok_or_else(|| TabsnapError::command_failed("forward", "no socket scripted"))
    }

    async fn close(&self) -> TabsnapResult<()> {
        self.script.record("close".to_string());
        Ok(())
    }
}

/// A background process that exits as soon as it is waited on.
pub struct FakeProcess {
    script: Script,
    name: String,
}

#[async_trait::async_trait]
impl RemoteProcess for FakeProcess {
    async fn wait(&mut self) -> TabsnapResult<()> {
        self.script.record(format!("wait:{}", self.name));
        Ok(())
    }

    async fn kill(&mut self) -> TabsnapResult<()> {
        self.script.record(format!("kill:{}", self.name));
        Ok(())
    }
}

/// Decoder that turns every pushed chunk into one solid frame.
#[derive(Clone)]
pub struct FakeDecoders {
    pub width: u32,
    pub height: u32,
    pub fail_open: bool,
    pub opened: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
    pub pool: FramePool,
}

impl FakeDecoders {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            fail_open: false,
            opened: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
            pool: FramePool::new(4),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Self::new(1, 1)
        }
    }

    pub fn closes(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl DecoderFactory for FakeDecoders {
    fn open(&self, codec: VideoCodec, frames: FrameSender) -> TabsnapResult<Box<dyn VideoDecoder>> {
        assert_eq!(codec, VideoCodec::H264);
        if self.fail_open {
            return Err(TabsnapError::decoder_init("no hardware decoder"));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeDecoder {
            factory: self.clone(),
            frames: Some(frames),
        }))
    }
}

struct FakeDecoder {
    factory: FakeDecoders,
    frames: Option<FrameSender>,
}

#[async_trait::async_trait]
impl VideoDecoder for FakeDecoder {
    async fn push(&mut self, chunk: &[u8]) -> TabsnapResult<()> {
        let Some(frames) = &self.frames else {
            return Ok(());
        };
        let (w, h) = (self.factory.width, self.factory.height);
        let mut pixels = self.factory.pool.take((w * h * 4) as usize);
        pixels.fill(chunk.first().copied().unwrap_or(0));
        let frame = DecodedFrame::pooled(w, h, pixels, self.factory.pool.clone());
        let _ = frames.send(frame).await;
        Ok(())
    }

    async fn close(&mut self) -> TabsnapResult<()> {
        if self.frames.take().is_some() {
            self.factory.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
