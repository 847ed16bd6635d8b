//! Fixed-interval poll cycles.
//!
//! A cycle is `GET`, then one `<id>=<value>` per writable slot in declared
//! order, each preceded by the command spacing. Cycles run inline in the
//! timer loop, so a slow cycle delays (never overlaps) the next one.

use std::sync::Arc;
use std::time::Duration;

use regbridge_common::Severity;
use tokio::sync::{Mutex, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::codec::{encode_read_request, encode_write_command};
use crate::config::BridgeSettings;
use crate::host::Host;
use crate::link::Link;
use crate::registers::RegisterMap;
use crate::shutdown_requested;

/// Result of one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Link was not connected; nothing was sent.
    Skipped,
    /// Read request and every write command were sent.
    Completed { writes: usize },
    /// The link dropped part-way through the cycle.
    Interrupted { writes: usize },
}

/// Drives poll cycles against a [`Link`].
pub struct PollScheduler<H: Host> {
    link: Arc<Link>,
    registers: Arc<Mutex<RegisterMap>>,
    host: Arc<H>,
    interval: Duration,
    warmup: Duration,
    spacing: Duration,
}

impl<H: Host> PollScheduler<H> {
    pub fn new(
        link: Arc<Link>,
        registers: Arc<Mutex<RegisterMap>>,
        host: Arc<H>,
        settings: &BridgeSettings,
    ) -> Self {
        Self {
            link,
            registers,
            host,
            interval: settings.poll_interval().max(Duration::from_millis(1)),
            warmup: settings.warmup(),
            spacing: settings.command_spacing(),
        }
    }

    /// Run the warm-up cycle, then cycle every interval until shutdown.
    ///
    /// Shutdown is observed between cycles; a cycle in progress finishes.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            warmup_ms = self.warmup.as_millis() as u64,
            "Poll scheduler started"
        );

        tokio::select! {
            _ = tokio::time::sleep(self.warmup) => {}
            _ = shutdown_requested(&mut shutdown) => {
                info!("Poll scheduler stopped before first cycle");
                return;
            }
        }

        self.run_cycle().await;

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_requested(&mut shutdown) => break,

                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
            }
        }

        info!("Poll scheduler stopped");
    }

    /// Execute one cycle now.
    pub async fn run_cycle(&self) -> CycleOutcome {
        if !self.link.is_connected() {
            trace!(state = %self.link.state(), "Link not connected, skipping poll cycle");
            return CycleOutcome::Skipped;
        }

        self.sync_setpoints().await;

        if !self.link.write_line(&encode_read_request()).await {
            return CycleOutcome::Interrupted { writes: 0 };
        }

        let count = self.registers.lock().await.writable_count();
        let mut writes = 0;

        for index in 0..count {
            tokio::time::sleep(self.spacing).await;

            // Read at emission time so commands received mid-cycle are sent.
            let line = {
                let registers = self.registers.lock().await;
                match registers.writable_slot(index) {
                    Some(slot) => encode_write_command(&slot.id, slot.value),
                    None => break,
                }
            };

            if !self.link.write_line(&line).await {
                debug!(writes, "Link dropped during poll cycle");
                return CycleOutcome::Interrupted { writes };
            }
            writes += 1;
        }

        trace!(writes, "Poll cycle completed");
        CycleOutcome::Completed { writes }
    }

    /// Copy host-side write targets into the writable slots.
    async fn sync_setpoints(&self) {
        let values = match self.host.channel_values().await {
            Ok(values) => values,
            Err(e) => {
                warn!(error = %e, "Failed to fetch host channel values, using cached values");
                self.host
                    .log_diagnostic(&format!("setpoint query failed: {}", e), Severity::Debug);
                return;
            }
        };

        if values.is_empty() {
            return;
        }

        let mut registers = self.registers.lock().await;
        for (id, value) in values {
            if let Err(e) = registers.set_write_value(&id, value) {
                trace!(%id, error = %e, "Ignoring host value");
            }
        }
    }
}
