//! Test fixtures: an in-memory host and duplex-backed devices.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use regbridge::host::{Host, HostError};
use regbridge::link::{ConnectFuture, Connector, SerialIo};
use regbridge_common::{ChannelDefinition, Reading, Severity};
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream, Lines,
    ReadBuf, ReadHalf, WriteHalf,
};
use tokio::time::Instant;

/// Host that records everything the bridge sends it.
pub struct RecordingHost {
    definitions: Vec<ChannelDefinition>,
    values: Mutex<HashMap<String, i64>>,
    published: Mutex<Vec<Vec<Reading>>>,
    diagnostics: Mutex<Vec<(String, Severity)>>,
}

impl RecordingHost {
    pub fn new(definitions: Vec<ChannelDefinition>) -> Arc<Self> {
        Arc::new(Self {
            definitions,
            values: Mutex::new(HashMap::new()),
            published: Mutex::new(Vec::new()),
            diagnostics: Mutex::new(Vec::new()),
        })
    }

    pub fn set_value(&self, id: &str, value: i64) {
        self.values.lock().unwrap().insert(id.to_string(), value);
    }

    pub fn published(&self) -> Vec<Vec<Reading>> {
        self.published.lock().unwrap().clone()
    }

    pub fn diagnostics(&self) -> Vec<(String, Severity)> {
        self.diagnostics.lock().unwrap().clone()
    }

    pub fn diagnostics_at(&self, severity: Severity) -> Vec<String> {
        self.diagnostics()
            .into_iter()
            .filter(|(_, s)| *s == severity)
            .map(|(text, _)| text)
            .collect()
    }
}

impl Host for RecordingHost {
    async fn channel_definitions(&self) -> Result<Vec<ChannelDefinition>, HostError> {
        Ok(self.definitions.clone())
    }

    async fn channel_values(&self) -> Result<HashMap<String, i64>, HostError> {
        Ok(self.values.lock().unwrap().clone())
    }

    async fn publish_readings(&self, readings: Vec<Reading>) -> Result<(), HostError> {
        self.published.lock().unwrap().push(readings);
        Ok(())
    }

    fn log_diagnostic(&self, text: &str, severity: Severity) {
        self.diagnostics
            .lock()
            .unwrap()
            .push((text.to_string(), severity));
    }
}

/// Connector replaying a script of open attempts: `None` fails, `Some` succeeds.
pub struct ScriptedConnector {
    script: Mutex<VecDeque<Option<DuplexStream>>>,
    attempts: AtomicUsize,
}

impl ScriptedConnector {
    pub fn new(script: Vec<Option<DuplexStream>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            attempts: AtomicUsize::new(0),
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Connector for ScriptedConnector {
    fn connect(&self) -> ConnectFuture {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front().flatten();

        Box::pin(async move {
            next.map(|stream| Box::new(stream) as Box<dyn SerialIo>)
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "No such file or directory"))
        })
    }

    fn target(&self) -> String {
        "scripted".to_string()
    }
}

/// Stream that never yields data and rejects every write with `BrokenPipe`.
struct BrokenPipe {
    writes: Arc<AtomicUsize>,
}

impl AsyncRead for BrokenPipe {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}

impl AsyncWrite for BrokenPipe {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe")))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Connector whose streams open fine but fail on the first write.
pub struct BrokenPipeConnector {
    writes: Arc<AtomicUsize>,
}

impl BrokenPipeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            writes: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Write attempts that reached the stream.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl Connector for BrokenPipeConnector {
    fn connect(&self) -> ConnectFuture {
        let stream = BrokenPipe {
            writes: self.writes.clone(),
        };
        Box::pin(async move { Ok(Box::new(stream) as Box<dyn SerialIo>) })
    }

    fn target(&self) -> String {
        "broken-pipe".to_string()
    }
}

/// The microcontroller's end of a link.
pub struct Device {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

impl Device {
    pub fn new(stream: DuplexStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    pub async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{}\n", line).as_bytes())
            .await
            .expect("device write failed");
    }

    /// Next line from the bridge; `None` once the bridge closed the link.
    pub async fn next_line(&mut self) -> Option<String> {
        self.lines.next_line().await.expect("device read failed")
    }

    /// Next `count` lines with their arrival times.
    pub async fn read_lines(&mut self, count: usize) -> Vec<(Instant, String)> {
        let mut lines = Vec::with_capacity(count);
        for _ in 0..count {
            let line = tokio::time::timeout(Duration::from_secs(10), self.next_line())
                .await
                .expect("timed out waiting for bridge output")
                .expect("link closed");
            lines.push((Instant::now(), line));
        }
        lines
    }
}

/// A bridge-side stream and the device attached to it.
pub fn device_pair() -> (DuplexStream, Device) {
    let (bridge_end, device_end) = tokio::io::duplex(64 * 1024);
    (bridge_end, Device::new(device_end))
}

/// Poll `condition` until it holds or five (virtual) seconds pass.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
