//! Bridge coordinator.
//!
//! Owns the register map and the link, and runs three tasks:
//!
//! - the poll scheduler (outbound `GET` and write commands)
//! - the event loop (inbound lines and host write commands)
//! - an optional link supervisor that reopens a dropped link
//!
//! Shutdown stops the scheduler first, then closes the link.

use std::sync::Arc;

use regbridge_common::{Reading, ReadingStatus, Severity, WriteCommand, current_timestamp_millis};
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::codec::{Frame, FrameCodec, ReadingFrame};
use crate::config::{BridgeSettings, ReconnectPolicy};
use crate::host::{Host, HostError};
use crate::link::{Connector, Link, LinkEvent, LinkState};
use crate::registers::{RegisterError, RegisterMap, RegisterSlot};
use crate::scheduler::PollScheduler;
use crate::shutdown_requested;

/// Errors that abort bridge startup.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("invalid channel configuration: {0}")]
    Config(#[from] RegisterError),

    #[error("no readable channels configured")]
    NoReadableChannels,

    #[error("host error: {0}")]
    Host(#[from] HostError),
}

/// A running bridge.
pub struct Bridge {
    link: Arc<Link>,
    registers: Arc<Mutex<RegisterMap>>,
    shutdown_tx: watch::Sender<bool>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stopped: OnceCell<()>,
}

impl Bridge {
    /// Build the register map from the host's channel list, open the link
    /// and start polling.
    ///
    /// A link that fails to open is reported to the host and left faulted;
    /// only channel configuration errors fail startup.
    pub async fn start<H: Host>(
        host: Arc<H>,
        connector: Arc<dyn Connector>,
        settings: &BridgeSettings,
        commands: mpsc::Receiver<WriteCommand>,
    ) -> Result<Self, BridgeError> {
        let definitions = host.channel_definitions().await?;
        let registers = RegisterMap::from_definitions(&definitions)?;
        if registers.readable_count() == 0 {
            return Err(BridgeError::NoReadableChannels);
        }

        let mut expected_fields = registers.readable_count();
        if settings.echo_writes {
            expected_fields += registers.writable_count();
        }

        info!(
            readable = registers.readable_count(),
            writable = registers.writable_count(),
            expected_fields,
            "Register map initialized"
        );

        let registers = Arc::new(Mutex::new(registers));
        let (link, events) = Link::new(connector);
        let link = Arc::new(link);

        if let Err(e) = link.open().await {
            error!(error = %e, "Link unavailable at startup");
            host.log_diagnostic(&e.to_string(), Severity::Error);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let scheduler = PollScheduler::new(link.clone(), registers.clone(), host.clone(), settings);
        let scheduler = tokio::spawn(scheduler.run(shutdown_rx.clone()));

        let handler = FrameHandler {
            registers: registers.clone(),
            host: host.clone(),
            codec: FrameCodec::new(expected_fields),
            echo_writes: settings.echo_writes,
        };
        let mut tasks = vec![tokio::spawn(handler.run(
            events,
            commands,
            shutdown_rx.clone(),
        ))];

        if settings.reconnect.enabled() {
            tasks.push(tokio::spawn(supervise_link(
                link.clone(),
                host,
                settings.reconnect.clone(),
                shutdown_rx,
            )));
        }

        Ok(Self {
            link,
            registers,
            shutdown_tx,
            scheduler: Mutex::new(Some(scheduler)),
            tasks: Mutex::new(tasks),
            stopped: OnceCell::new(),
        })
    }

    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    /// Watch link state transitions.
    pub fn subscribe_link(&self) -> watch::Receiver<LinkState> {
        self.link.subscribe()
    }

    /// Current value of every slot.
    pub async fn snapshot(&self) -> Vec<RegisterSlot> {
        self.registers.lock().await.snapshot()
    }

    /// Stop polling, then close the link.
    ///
    /// Runs once. Concurrent and later callers wait for that run to finish,
    /// so every caller returns with the link disconnected.
    pub async fn shutdown(&self) {
        if self.stopped.initialized() {
            debug!("Bridge already shut down");
            return;
        }

        self.stopped.get_or_init(|| self.stop()).await;
    }

    async fn stop(&self) {
        info!("Shutting down bridge");
        let _ = self.shutdown_tx.send(true);

        if let Some(scheduler) = self.scheduler.lock().await.take() {
            if let Err(e) = scheduler.await {
                warn!(error = %e, "Poll scheduler ended abnormally");
            }
        }

        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }

        self.link.close().await;
        info!("Bridge stopped");
    }
}

/// Decode path and command path.
struct FrameHandler<H: Host> {
    registers: Arc<Mutex<RegisterMap>>,
    host: Arc<H>,
    codec: FrameCodec,
    echo_writes: bool,
}

impl<H: Host> FrameHandler<H> {
    async fn run(
        self,
        mut events: mpsc::UnboundedReceiver<LinkEvent>,
        mut commands: mpsc::Receiver<WriteCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,

                Some(event) = events.recv() => match event {
                    LinkEvent::Line(line) => self.handle_line(&line).await,
                    LinkEvent::Error(message) => {
                        self.host
                            .log_diagnostic(&format!("link error: {}", message), Severity::Error);
                    }
                    LinkEvent::Closed => {
                        self.host.log_diagnostic("device closed the link", Severity::Warn);
                    }
                    LinkEvent::Discarded { bytes } => {
                        self.host.log_diagnostic(
                            &format!("discarded {} byte line without delimiter", bytes),
                            Severity::Warn,
                        );
                    }
                },

                Some(command) = commands.recv() => self.handle_command(command).await,
            }
        }

        debug!("Frame handler stopped");
    }

    async fn handle_line(&self, line: &str) {
        match self.codec.decode_line(line) {
            Ok(Frame::Empty) => {}
            Ok(Frame::Diagnostic(text)) => self.host.log_diagnostic(&text, Severity::Info),
            Ok(Frame::Reading(frame)) => self.handle_reading(frame).await,
            Err(e) => {
                warn!(error = %e, line = %line.trim(), "Dropping malformed frame");
                self.host.log_diagnostic(
                    &format!("dropped frame '{}': {}", line.trim(), e),
                    Severity::Warn,
                );
            }
        }
    }

    async fn handle_reading(&self, frame: ReadingFrame) {
        let updated = {
            let mut registers = self.registers.lock().await;
            let readable = registers.readable_count().min(frame.values.len());
            let (values, echoed) = frame.values.split_at(readable);

            if self.echo_writes {
                for mismatch in registers.echo_mismatches(echoed) {
                    debug!(
                        id = %mismatch.id,
                        commanded = mismatch.commanded,
                        echoed = mismatch.echoed,
                        "Device echo differs from commanded value"
                    );
                }
            }

            match registers.apply_reading(values) {
                Ok(updated) => updated,
                Err(e) => {
                    warn!(error = %e, "Reading rejected by register map");
                    self.host.log_diagnostic(&e.to_string(), Severity::Warn);
                    return;
                }
            }
        };

        if !frame.coerced.is_empty() {
            warn!(fields = ?frame.coerced, "Unparsable fields coerced to 0");
        }

        let readings: Vec<Reading> = updated
            .into_iter()
            .enumerate()
            .map(|(index, slot)| Reading {
                timestamp: slot
                    .updated_at
                    .map(|t| t.timestamp_millis())
                    .unwrap_or_else(current_timestamp_millis),
                status: if frame.coerced.contains(&index) {
                    ReadingStatus::Coerced
                } else {
                    ReadingStatus::Ok
                },
                id: slot.id,
                value: slot.value,
            })
            .collect();

        if let Err(e) = self.host.publish_readings(readings).await {
            warn!(error = %e, "Failed to publish readings");
        }
    }

    async fn handle_command(&self, command: WriteCommand) {
        let result = self
            .registers
            .lock()
            .await
            .set_write_value(&command.id, command.value);

        match result {
            Ok(()) => debug!(id = %command.id, value = command.value, "Write value updated"),
            Err(e) => {
                warn!(id = %command.id, value = command.value, error = %e, "Ignoring write command");
                self.host.log_diagnostic(
                    &format!("ignored write {}={}: {}", command.id, command.value, e),
                    Severity::Warn,
                );
            }
        }
    }
}

/// Reopen the link with backoff whenever it drops, up to `policy.max_attempts`
/// consecutive failures.
async fn supervise_link<H: Host>(
    link: Arc<Link>,
    host: Arc<H>,
    policy: ReconnectPolicy,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut states = link.subscribe();

    loop {
        tokio::select! {
            _ = shutdown_requested(&mut shutdown) => return,
            down = link_down(&mut states) => {
                if !down {
                    return;
                }
            }
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            if attempt > policy.max_attempts {
                error!(attempts = policy.max_attempts, "Giving up on reconnecting the link");
                host.log_diagnostic(
                    &format!("link down after {} reconnect attempts", policy.max_attempts),
                    Severity::Error,
                );
                return;
            }

            let delay = policy.delay(attempt);
            warn!(
                attempt,
                max_attempts = policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Link down, reconnecting"
            );

            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => return,
                _ = tokio::time::sleep(delay) => {}
            }

            link.close().await;
            match link.open().await {
                Ok(()) => {
                    info!(attempt, "Link reconnected");
                    host.log_diagnostic("link reconnected", Severity::Info);
                    break;
                }
                Err(e) => warn!(attempt, error = %e, "Reconnect failed"),
            }
        }
    }
}

/// Wait until the link is disconnected or faulted. `false` if the link is gone.
async fn link_down(states: &mut watch::Receiver<LinkState>) -> bool {
    states
        .wait_for(|state| matches!(state, LinkState::Disconnected | LinkState::Faulted))
        .await
        .is_ok()
}
