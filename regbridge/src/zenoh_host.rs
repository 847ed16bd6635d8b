//! Host collaborator backed by a Zenoh session.
//!
//! # Key Expressions
//!
//! ```text
//! <prefix>/<device>/<channel>             readings (put, one per channel)
//! <prefix>/<device>/setpoint/<channel>    write targets (queried each cycle)
//! <prefix>/<device>/@/commands/write      write commands (subscribed)
//! <prefix>/<device>/@/channels            channel definitions (put once)
//! <prefix>/<device>/@/diagnostics         diagnostics
//! <prefix>/<device>/@/status              bridge status
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use regbridge_common::serialization::decode_integer;
use regbridge_common::{
    BridgeStatus, ChannelDefinition, ChannelKeys, Diagnostic, Direction, Format, Reading,
    Severity, WriteCommand, encode,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};
use zenoh::Session;
use zenoh::sample::SampleKind;

use crate::config::BridgeSettings;
use crate::host::{Host, HostError};

/// [`Host`] implementation publishing to and querying a Zenoh network.
pub struct ZenohHost {
    session: Arc<Session>,
    keys: ChannelKeys,
    format: Format,
    definitions: Vec<ChannelDefinition>,
    sync_setpoints: bool,
    setpoint_timeout: Duration,
}

impl ZenohHost {
    pub fn new(
        session: Arc<Session>,
        settings: &BridgeSettings,
        definitions: Vec<ChannelDefinition>,
    ) -> Self {
        Self {
            session,
            keys: ChannelKeys::new(&settings.key_prefix, &settings.device),
            format: settings.serialization,
            definitions,
            sync_setpoints: settings.sync_setpoints,
            setpoint_timeout: settings.setpoint_timeout(),
        }
    }

    pub fn keys(&self) -> &ChannelKeys {
        &self.keys
    }

    /// Announce the channel list so host-side storage can create missing channels.
    pub async fn announce_channels(&self) -> Result<(), HostError> {
        let key = self.keys.channels();
        let payload = encode(&self.definitions, self.format)?;

        self.session
            .put(&key, payload)
            .await
            .map_err(|e| HostError::Publish(format!("{}: {}", key, e)))?;

        info!(key = %key, channels = self.definitions.len(), "Announced channels");
        Ok(())
    }

    /// Publish bridge status as JSON.
    pub async fn publish_status(&self, status: &BridgeStatus) -> Result<(), HostError> {
        let key = self.keys.status();
        let payload = encode(status, Format::Json)?;

        self.session
            .put(&key, payload)
            .await
            .map_err(|e| HostError::Publish(format!("{}: {}", key, e)))
    }

    /// Forward write commands received on the command key until shutdown.
    pub async fn listen_commands(
        &self,
        commands: mpsc::Sender<WriteCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), HostError> {
        let key = self.keys.write_commands();
        let subscriber = self
            .session
            .declare_subscriber(&key)
            .await
            .map_err(|e| HostError::Unavailable(format!("subscribe {}: {}", key, e)))?;

        info!(key = %key, "Listening for write commands");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("Command listener stopping");
                        break;
                    }
                }

                sample = subscriber.recv_async() => {
                    let sample = match sample {
                        Ok(sample) => sample,
                        Err(e) => {
                            error!(error = %e, "Command subscriber closed");
                            return Err(HostError::Unavailable(e.to_string()));
                        }
                    };

                    if sample.kind() == SampleKind::Delete {
                        trace!(key = %sample.key_expr(), "Ignoring delete sample");
                        continue;
                    }

                    match WriteCommand::from_payload(&sample.payload().to_bytes()) {
                        Ok(command) => {
                            debug!(id = %command.id, value = command.value, "Write command received");
                            if commands.send(command).await.is_err() {
                                debug!("Command receiver dropped");
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(key = %sample.key_expr(), error = %e, "Ignoring malformed write command");
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// Extract `(channel, value)` from one setpoint reply, for writable channels only.
fn parse_setpoint_reply(
    keys: &ChannelKeys,
    definitions: &[ChannelDefinition],
    key: &str,
    payload: &[u8],
) -> Option<(String, i64)> {
    let channel = keys.parse_setpoint(key)?;

    let writable = definitions
        .iter()
        .any(|d| d.id == channel && d.direction == Direction::Writable);
    if !writable {
        trace!(%key, "Ignoring setpoint for non-writable channel");
        return None;
    }

    match decode_integer(payload) {
        Some(value) => Some((channel.to_string(), value)),
        None => {
            debug!(%key, "Ignoring non-integer setpoint");
            None
        }
    }
}

impl Host for ZenohHost {
    async fn channel_definitions(&self) -> Result<Vec<ChannelDefinition>, HostError> {
        Ok(self.definitions.clone())
    }

    async fn channel_values(&self) -> Result<HashMap<String, i64>, HostError> {
        let mut values = HashMap::new();
        if !self.sync_setpoints {
            return Ok(values);
        }

        let selector = self.keys.setpoint_selector();
        let replies = self
            .session
            .get(selector.as_str())
            .timeout(self.setpoint_timeout)
            .await
            .map_err(|e| HostError::Query(format!("{}: {}", selector, e)))?;

        while let Ok(reply) = replies.recv_async().await {
            match reply.result() {
                Ok(sample) => {
                    let payload = sample.payload().to_bytes();
                    if let Some((id, value)) = parse_setpoint_reply(
                        &self.keys,
                        &self.definitions,
                        sample.key_expr().as_str(),
                        &payload,
                    ) {
                        values.insert(id, value);
                    }
                }
                Err(err) => {
                    debug!(selector = %selector, error = ?err, "Setpoint query returned an error reply");
                }
            }
        }

        trace!(count = values.len(), "Fetched setpoints");
        Ok(values)
    }

    async fn publish_readings(&self, readings: Vec<Reading>) -> Result<(), HostError> {
        for reading in &readings {
            let key = self.keys.reading(&reading.id);
            let payload = encode(reading, self.format)?;

            self.session
                .put(&key, payload)
                .await
                .map_err(|e| HostError::Publish(format!("{}: {}", key, e)))?;
        }

        trace!(count = readings.len(), "Published readings");
        Ok(())
    }

    fn log_diagnostic(&self, text: &str, severity: Severity) {
        match severity {
            Severity::Error => error!(diagnostic = %text, "Device diagnostic"),
            Severity::Warn => warn!(diagnostic = %text, "Device diagnostic"),
            Severity::Info => info!(diagnostic = %text, "Device diagnostic"),
            Severity::Debug => debug!(diagnostic = %text, "Device diagnostic"),
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let payload = match encode(&Diagnostic::new(text, severity), self.format) {
            Ok(payload) => payload,
            Err(e) => {
                debug!(error = %e, "Failed to encode diagnostic");
                return;
            }
        };

        let session = self.session.clone();
        let key = self.keys.diagnostics();
        runtime.spawn(async move {
            if let Err(e) = session.put(&key, payload).await {
                debug!(key = %key, error = %e, "Failed to publish diagnostic");
            }
        });
    }
}
