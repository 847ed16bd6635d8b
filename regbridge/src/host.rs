//! Host collaborator interface.
//!
//! The host owns channel storage. The bridge reads the channel list once at
//! startup, polls it for write targets, and pushes readings and diagnostics
//! back. Write commands pushed by the host arrive separately on an
//! `mpsc::Receiver<WriteCommand>` handed to [`Bridge::start`](crate::bridge::Bridge::start).

use std::collections::HashMap;
use std::future::Future;

use regbridge_common::{ChannelDefinition, Reading, Severity};
use thiserror::Error;

/// Errors raised by a host implementation.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("host unavailable: {0}")]
    Unavailable(String),

    #[error("host query failed: {0}")]
    Query(String),

    #[error("failed to publish to host: {0}")]
    Publish(String),
}

impl From<regbridge_common::Error> for HostError {
    fn from(e: regbridge_common::Error) -> Self {
        HostError::Publish(e.to_string())
    }
}

/// The supervisory system the bridge serves.
pub trait Host: Send + Sync + 'static {
    /// Ordered channel list used to build the register map.
    fn channel_definitions(
        &self,
    ) -> impl Future<Output = Result<Vec<ChannelDefinition>, HostError>> + Send;

    /// Current host-side values, keyed by channel id.
    ///
    /// Ids that are not writable channels are ignored by the caller.
    fn channel_values(&self) -> impl Future<Output = Result<HashMap<String, i64>, HostError>> + Send;

    /// Deliver the readings of one decoded frame.
    fn publish_readings(
        &self,
        readings: Vec<Reading>,
    ) -> impl Future<Output = Result<(), HostError>> + Send;

    /// Best-effort diagnostic. Must not block.
    fn log_diagnostic(&self, text: &str, severity: Severity);
}
