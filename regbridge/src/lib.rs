//! Serial register bridge.
//!
//! Polls a microcontroller over a newline-delimited text protocol and
//! exposes its registers as named channels on Zenoh.
//!
//! # Key Expressions
//!
//! ```text
//! regbridge/<device>/<channel>
//! ```
//!
//! Where:
//! - `<device>` - Device name from configuration
//! - `<channel>` - Channel id (`R0`..`R3`, `W0`..`W3` by default)
//!
//! Write targets are read from `regbridge/<device>/setpoint/<channel>` and
//! pushed on `regbridge/<device>/@/commands/write`.

pub mod bridge;
pub mod codec;
pub mod config;
pub mod host;
pub mod link;
pub mod registers;
pub mod scheduler;
pub mod zenoh_host;

use tokio::sync::watch;

/// Resolve once `shutdown` reads `true` or its sender is gone.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|&stop| stop).await;
}
