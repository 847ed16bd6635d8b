//! Register Bridge Common Library
//!
//! Shared types and plumbing for the serial register bridge and anything on the
//! host side that talks to it over Zenoh:
//!
//! - [`channel`] - Channel data model (`ChannelDefinition`, `Reading`, `WriteCommand`)
//! - [`serialization`] - JSON/CBOR encoding and decoding
//! - [`config`] - Configuration loading (JSON5 format)
//! - [`session`] - Zenoh session management
//! - [`keyexpr`] - Key expressions for readings, setpoints and commands
//! - [`status`] - Bridge status reporting
//! - [`error`] - Error types

pub mod channel;
pub mod config;
pub mod error;
pub mod keyexpr;
pub mod serialization;
pub mod session;
pub mod status;

// Re-export commonly used types at the crate root
pub use channel::{
    ChannelDefinition, Diagnostic, Direction, Reading, ReadingStatus, Severity, WriteCommand,
    current_timestamp_millis,
};
pub use config::{BridgeConfig, LogFormat, LoggingConfig, ZenohConfig, load_config, parse_config};
pub use error::{Error, Result};
pub use keyexpr::{ChannelKeys, KEY_PREFIX};
pub use serialization::{Format, decode, decode_auto, encode};
pub use session::connect;
pub use status::BridgeStatus;

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level when set.
///
/// # Example
///
/// ```ignore
/// use regbridge_common::{LoggingConfig, LogFormat, init_tracing};
///
/// let config = LoggingConfig {
///     level: "debug".to_string(),
///     format: LogFormat::Json,
/// };
/// init_tracing(&config)?;
/// ```
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let result = match config.format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .try_init(),
    };

    result.map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))
}
