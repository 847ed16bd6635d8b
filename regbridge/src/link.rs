//! Serial link lifecycle and line I/O.
//!
//! State machine:
//!
//! ```text
//! Disconnected --open--> Connecting --ok--> Connected --EOF--> Disconnected
//!                            |                  |
//!                            +--error--> Faulted <--I/O error
//! ```
//!
//! `close()` returns any state to Disconnected. A faulted link refuses
//! `open()` until it has been closed.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, WriteHalf,
};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::codec::LINE_DELIMITER;
use crate::config::SerialConfig;

/// Longest inbound line kept, delimiter excluded. Longer lines are discarded.
pub const MAX_LINE_LENGTH: usize = 1024;

/// Byte stream a link runs over.
pub trait SerialIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> SerialIo for T {}

/// Future returned by [`Connector::connect`].
pub type ConnectFuture = Pin<Box<dyn Future<Output = io::Result<Box<dyn SerialIo>>> + Send>>;

/// Opens the underlying stream for a [`Link`].
pub trait Connector: Send + Sync {
    /// Open a fresh stream.
    fn connect(&self) -> ConnectFuture;

    /// Human-readable description of the endpoint (for logs).
    fn target(&self) -> String;
}

/// Connector for a local serial port.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    config: SerialConfig,
}

impl SerialConnector {
    pub fn new(config: SerialConfig) -> Self {
        Self { config }
    }
}

impl Connector for SerialConnector {
    fn connect(&self) -> ConnectFuture {
        let parity = match self.config.parity.to_lowercase().as_str() {
            "even" => tokio_serial::Parity::Even,
            "odd" => tokio_serial::Parity::Odd,
            _ => tokio_serial::Parity::None,
        };

        let stop_bits = match self.config.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        };

        let data_bits = match self.config.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        };

        let builder = tokio_serial::new(&self.config.port, self.config.baud_rate)
            .parity(parity)
            .stop_bits(stop_bits)
            .data_bits(data_bits);

        Box::pin(async move {
            let stream = tokio_serial::SerialStream::open(&builder).map_err(io::Error::other)?;
            Ok(Box::new(stream) as Box<dyn SerialIo>)
        })
    }

    fn target(&self) -> String {
        format!("{} @ {} baud", self.config.port, self.config.baud_rate)
    }
}

/// Connection state of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Faulted,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Faulted => "faulted",
        }
    }

    /// Transitions driven by open/read/write outcomes. `close()` is exempt.
    fn can_transition_to(self, next: LinkState) -> bool {
        use LinkState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Faulted)
                | (Connected, Disconnected)
                | (Connected, Faulted)
        )
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Events surfaced by a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// One complete line, without its delimiter.
    Line(String),
    /// I/O failure while connected; the link is now faulted.
    Error(String),
    /// The device closed the stream; the link is now disconnected.
    Closed,
    /// A line longer than [`MAX_LINE_LENGTH`] was dropped.
    Discarded { bytes: usize },
}

/// Link errors.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("failed to open {target}: {source}")]
    Open {
        target: String,
        #[source]
        source: io::Error,
    },
    #[error("link is faulted; close it before reopening")]
    Faulted,
    #[error("link is {0}, cannot open")]
    Busy(LinkState),
    #[error("link was closed while opening")]
    Cancelled,
}

fn transition(state: &watch::Sender<LinkState>, next: LinkState) -> bool {
    state.send_if_modified(|current| {
        if !current.can_transition_to(next) {
            return false;
        }
        info!(from = %current, to = %next, "Link state changed");
        *current = next;
        true
    })
}

/// Owner of the serial connection.
///
/// Writes are serialized through one lock; inbound lines are delivered on
/// the event channel returned by [`Link::new`].
pub struct Link {
    connector: Arc<dyn Connector>,
    state: Arc<watch::Sender<LinkState>>,
    writer: Mutex<Option<WriteHalf<Box<dyn SerialIo>>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    events: mpsc::UnboundedSender<LinkEvent>,
}

impl Link {
    /// Create a disconnected link and its event receiver.
    pub fn new(connector: Arc<dyn Connector>) -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(LinkState::Disconnected);

        let link = Self {
            connector,
            state: Arc::new(state),
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            events,
        };

        (link, rx)
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    pub fn target(&self) -> String {
        self.connector.target()
    }

    /// Open the device: Disconnected -> Connecting -> Connected | Faulted.
    pub async fn open(&self) -> Result<(), LinkError> {
        let mut blocked = None;
        self.state.send_if_modified(|current| {
            if *current == LinkState::Disconnected {
                *current = LinkState::Connecting;
                true
            } else {
                blocked = Some(*current);
                false
            }
        });

        match blocked {
            Some(LinkState::Faulted) => return Err(LinkError::Faulted),
            Some(state) => return Err(LinkError::Busy(state)),
            None => {}
        }

        let target = self.connector.target();
        info!(%target, "Opening link");

        let stream = match self.connector.connect().await {
            Ok(stream) => stream,
            Err(source) => {
                transition(&self.state, LinkState::Faulted);
                error!(%target, error = %source, "Failed to open link");
                return Err(LinkError::Open { target, source });
            }
        };

        let (reader, writer) = tokio::io::split(stream);
        *self.writer.lock().await = Some(writer);

        // Held until the reader handle is stored, so close() always finds it.
        let mut reader_task = self.reader.lock().await;

        if !transition(&self.state, LinkState::Connected) {
            // close() ran while the connector was pending
            drop(reader_task);
            self.writer.lock().await.take();
            return Err(LinkError::Cancelled);
        }

        let task = tokio::spawn(read_lines(reader, self.state.clone(), self.events.clone()));
        if let Some(previous) = reader_task.replace(task) {
            previous.abort();
        }
        drop(reader_task);

        info!(%target, "Link connected");
        Ok(())
    }

    /// Send one encoded line.
    ///
    /// Returns `false` without raising when the link is not connected or the
    /// write fails; a failed write faults the link.
    pub async fn write_line(&self, line: &[u8]) -> bool {
        let mut writer = self.writer.lock().await;

        if !self.is_connected() {
            debug!(state = %self.state(), "Link not connected, dropping outbound line");
            return false;
        }

        let Some(stream) = writer.as_mut() else {
            debug!("Link has no writer, dropping outbound line");
            return false;
        };

        let result: io::Result<()> = async {
            stream.write_all(line).await?;
            stream.flush().await
        }
        .await;

        match result {
            Ok(()) => {
                trace!(line = %String::from_utf8_lossy(line).trim_end(), "Sent");
                true
            }
            Err(e) => {
                error!(error = %e, "Link write failed");
                if transition(&self.state, LinkState::Faulted) {
                    let _ = self.events.send(LinkEvent::Error(e.to_string()));
                }
                false
            }
        }
    }

    /// Close the link. Idempotent; always ends Disconnected.
    pub async fn close(&self) {
        if let Some(task) = self.reader.lock().await.take() {
            task.abort();
        }

        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!(error = %e, "Error shutting down link writer");
            }
        }

        self.state.send_if_modified(|current| {
            if *current == LinkState::Disconnected {
                return false;
            }
            info!(from = %current, to = %LinkState::Disconnected, "Link closed");
            *current = LinkState::Disconnected;
            true
        });
    }
}

/// Read delimiter-terminated lines until EOF or error.
async fn read_lines<R: AsyncRead + Unpin>(
    reader: R,
    state: Arc<watch::Sender<LinkState>>,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut overflow = 0;

    loop {
        buf.clear();
        let read = (&mut reader)
            .take(MAX_LINE_LENGTH as u64 + 1)
            .read_until(LINE_DELIMITER, &mut buf)
            .await;

        match read {
            Ok(0) => {
                warn!("Device closed the link");
                if transition(&state, LinkState::Disconnected) {
                    let _ = events.send(LinkEvent::Closed);
                }
                break;
            }
            Ok(_) => {
                if buf.last() != Some(&LINE_DELIMITER) {
                    if buf.len() > MAX_LINE_LENGTH {
                        overflow += buf.len();
                    } else {
                        trace!(bytes = buf.len(), "Discarding unterminated trailing data");
                    }
                    continue;
                }

                if *state.borrow() != LinkState::Connected {
                    break;
                }

                let event = if overflow > 0 {
                    let bytes = overflow + buf.len();
                    overflow = 0;
                    warn!(bytes, max = MAX_LINE_LENGTH, "Discarding overlong line");
                    LinkEvent::Discarded { bytes }
                } else {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\r', '\n']).to_string();
                    trace!(%line, "Received");
                    LinkEvent::Line(line)
                };

                if events.send(event).is_err() {
                    break;
                }
            }
            Err(e) => {
                error!(error = %e, "Link read failed");
                if transition(&state, LinkState::Faulted) {
                    let _ = events.send(LinkEvent::Error(e.to_string()));
                }
                break;
            }
        }
    }
}
