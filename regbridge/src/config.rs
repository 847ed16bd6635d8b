//! Configuration for the register bridge.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use regbridge_common::config::{BridgeConfig, LoggingConfig, ZenohConfig};
use regbridge_common::{ChannelDefinition, Direction, Error, Format, KEY_PREFIX, Result};

/// Complete bridge configuration.
///
/// Every section is optional; an empty file yields a bridge for the
/// default 4 readable + 4 writable layout on the platform's default port.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegBridgeConfig {
    /// Zenoh connection settings
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// Serial link settings
    #[serde(default)]
    pub serial: SerialConfig,

    /// Polling and publishing behaviour
    #[serde(default)]
    pub bridge: BridgeSettings,

    /// Channel layout
    #[serde(default)]
    pub channels: ChannelLayout,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial port settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyACM0" or "COM3")
    #[serde(default = "default_port")]
    pub port: String,

    /// Baud rate (default: 115200)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Data bits (default: 8)
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,

    /// Parity: "none", "even", or "odd" (default: "none")
    #[serde(default = "default_parity")]
    pub parity: String,

    /// Stop bits: 1 or 2 (default: 1)
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
}

fn default_port() -> String {
    if cfg!(windows) {
        "COM3".to_string()
    } else {
        "/dev/ttyACM0".to_string()
    }
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_data_bits() -> u8 {
    8
}

fn default_parity() -> String {
    "none".to_string()
}

fn default_stop_bits() -> u8 {
    1
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: default_parity(),
            stop_bits: default_stop_bits(),
        }
    }
}

/// Polling, publishing and recovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSettings {
    /// Key expression prefix (default: "regbridge")
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Device name (used in key expressions)
    #[serde(default = "default_device")]
    pub device: String,

    /// Poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Delay before the first poll cycle
    #[serde(default = "default_warmup_ms")]
    pub warmup_ms: u64,

    /// Spacing before each write command within a cycle
    #[serde(default = "default_command_spacing_ms")]
    pub command_spacing_ms: u64,

    /// Device echoes the writable slots after the readable ones
    #[serde(default)]
    pub echo_writes: bool,

    /// Query host setpoints at the start of each cycle
    #[serde(default = "default_true")]
    pub sync_setpoints: bool,

    /// Timeout for the setpoint query
    #[serde(default = "default_setpoint_timeout_ms")]
    pub setpoint_timeout_ms: u64,

    /// Serialization format for readings
    #[serde(default)]
    pub serialization: Format,

    /// Link recovery policy
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

fn default_key_prefix() -> String {
    KEY_PREFIX.to_string()
}

fn default_device() -> String {
    "arduino".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_warmup_ms() -> u64 {
    500
}

fn default_command_spacing_ms() -> u64 {
    50
}

fn default_true() -> bool {
    true
}

fn default_setpoint_timeout_ms() -> u64 {
    250
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            device: default_device(),
            poll_interval_ms: default_poll_interval_ms(),
            warmup_ms: default_warmup_ms(),
            command_spacing_ms: default_command_spacing_ms(),
            echo_writes: false,
            sync_setpoints: true,
            setpoint_timeout_ms: default_setpoint_timeout_ms(),
            serialization: Format::default(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl BridgeSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    pub fn command_spacing(&self) -> Duration {
        Duration::from_millis(self.command_spacing_ms)
    }

    pub fn setpoint_timeout(&self) -> Duration {
        Duration::from_millis(self.setpoint_timeout_ms)
    }
}

/// Reconnection policy after the link faults or closes unexpectedly.
///
/// `max_attempts: 0` (the default) leaves the link down until the bridge
/// is restarted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Maximum consecutive reopen attempts (0 disables reconnection)
    #[serde(default)]
    pub max_attempts: u32,

    /// Delay before the first attempt
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for the backoff delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl ReconnectPolicy {
    /// Whether reconnection is enabled.
    pub fn enabled(&self) -> bool {
        self.max_attempts > 0
    }

    /// Delay before the given 1-based attempt: `base * 2^(attempt - 1)`, capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let shift = attempt.saturating_sub(1).min(30);
        let delay = self.base_delay_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// Channel layout: explicit definitions, or generated `R*`/`W*` counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelLayout {
    /// Number of readable slots when no definitions are given
    #[serde(default = "default_slot_count")]
    pub readable: usize,

    /// Number of writable slots when no definitions are given
    #[serde(default = "default_slot_count")]
    pub writable: usize,

    /// Explicit channel definitions (take precedence over the counts)
    #[serde(default)]
    pub definitions: Vec<ChannelDefinition>,
}

fn default_slot_count() -> usize {
    4
}

impl Default for ChannelLayout {
    fn default() -> Self {
        Self {
            readable: default_slot_count(),
            writable: default_slot_count(),
            definitions: Vec::new(),
        }
    }
}

impl ChannelLayout {
    /// Resolve the layout into ordered channel definitions.
    pub fn definitions(&self) -> Vec<ChannelDefinition> {
        if self.definitions.is_empty() {
            ChannelDefinition::layout(self.readable, self.writable)
        } else {
            self.definitions.clone()
        }
    }
}

/// Characters that would break either the line protocol or a key expression.
fn invalid_id_char(c: char) -> bool {
    c.is_whitespace() || matches!(c, ',' | '=' | '/' | '*' | '$' | '?' | '#')
}

fn validate_key_segment(name: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::Config(format!("{} cannot be empty", name)));
    }
    if value.contains(['*', '$', '?', '#']) {
        return Err(Error::Config(format!(
            "{} '{}' contains key expression wildcards",
            name, value
        )));
    }
    Ok(())
}

impl BridgeConfig for RegBridgeConfig {
    fn zenoh(&self) -> &ZenohConfig {
        &self.zenoh
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn validate(&self) -> Result<()> {
        let serial = &self.serial;
        if serial.port.trim().is_empty() {
            return Err(Error::Config("serial.port cannot be empty".to_string()));
        }
        if serial.baud_rate == 0 {
            return Err(Error::Config("serial.baud_rate must be positive".to_string()));
        }
        if !(5..=8).contains(&serial.data_bits) {
            return Err(Error::Config(format!(
                "serial.data_bits must be 5-8, got {}",
                serial.data_bits
            )));
        }
        match serial.parity.to_lowercase().as_str() {
            "none" | "even" | "odd" => {}
            other => {
                return Err(Error::Config(format!(
                    "invalid parity '{}' (use none, even, or odd)",
                    other
                )));
            }
        }
        if !matches!(serial.stop_bits, 1 | 2) {
            return Err(Error::Config(format!(
                "serial.stop_bits must be 1 or 2, got {}",
                serial.stop_bits
            )));
        }

        let bridge = &self.bridge;
        validate_key_segment("bridge.key_prefix", &bridge.key_prefix)?;
        validate_key_segment("bridge.device", &bridge.device)?;
        if bridge.device.contains('/') {
            return Err(Error::Config(format!(
                "bridge.device '{}' cannot contain '/'",
                bridge.device
            )));
        }
        if bridge.poll_interval_ms == 0 {
            return Err(Error::Config(
                "bridge.poll_interval_ms must be positive".to_string(),
            ));
        }
        if bridge.reconnect.enabled() && bridge.reconnect.base_delay_ms == 0 {
            return Err(Error::Config(
                "bridge.reconnect.base_delay_ms must be positive when reconnection is enabled"
                    .to_string(),
            ));
        }

        let definitions = self.channels.definitions();
        let mut seen = HashSet::new();
        for def in &definitions {
            if def.id.is_empty() || def.id.chars().any(invalid_id_char) {
                return Err(Error::Config(format!("invalid channel id '{}'", def.id)));
            }
            if !seen.insert(def.id.as_str()) {
                return Err(Error::Config(format!("duplicate channel id '{}'", def.id)));
            }
        }

        if !definitions
            .iter()
            .any(|d| d.direction == Direction::Readable)
        {
            return Err(Error::Config(
                "at least one readable channel must be configured".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = RegBridgeConfig::parse("{}").unwrap();

        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.bridge.poll_interval_ms, 1000);
        assert_eq!(config.bridge.command_spacing_ms, 50);
        assert_eq!(config.bridge.key_prefix, "regbridge");
        assert!(!config.bridge.echo_writes);
        assert!(!config.bridge.reconnect.enabled());

        let ids: Vec<_> = config
            .channels
            .definitions()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["R0", "R1", "R2", "R3", "W0", "W1", "W2", "W3"]);
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            zenoh: { mode: "client", connect: ["tcp/10.0.0.1:7447"] },
            serial: { port: "/dev/ttyUSB0", baud_rate: 9600, parity: "even" },
            bridge: {
                device: "tank",
                poll_interval_ms: 2000,
                echo_writes: true,
                serialization: "cbor",
                reconnect: { max_attempts: 5, base_delay_ms: 500 },
            },
            channels: {
                definitions: [
                    { id: "level", direction: "readable", description: "Tank level" },
                    { id: "pump", direction: "writable" },
                ],
            },
        }"#;

        let config = RegBridgeConfig::parse(json).unwrap();

        assert_eq!(config.serial.port, "/dev/ttyUSB0");
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.bridge.device, "tank");
        assert_eq!(config.bridge.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.bridge.serialization, Format::Cbor);
        assert!(config.bridge.echo_writes);

        let defs = config.channels.definitions();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].description.as_deref(), Some("Tank level"));
        assert_eq!(defs[1].direction, Direction::Writable);
    }

    #[test]
    fn test_count_layout() {
        let config = RegBridgeConfig::parse("{ channels: { readable: 8, writable: 0 } }").unwrap();
        let defs = config.channels.definitions();

        assert_eq!(defs.len(), 8);
        assert_eq!(defs[7].id, "R7");
    }

    #[test]
    fn test_reconnect_backoff() {
        let policy = ReconnectPolicy {
            max_attempts: 10,
            base_delay_ms: 100,
            max_delay_ms: 1000,
        };

        assert_eq!(policy.delay(0), Duration::ZERO);
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(4), Duration::from_millis(800));
        assert_eq!(policy.delay(5), Duration::from_millis(1000));
        assert_eq!(policy.delay(100), Duration::from_millis(1000));
    }

    #[test]
    fn test_validate_rejects_duplicate_channels() {
        let json = r#"{
            channels: {
                definitions: [
                    { id: "R0", direction: "readable" },
                    { id: "R0", direction: "writable" },
                ],
            },
        }"#;

        assert!(matches!(RegBridgeConfig::parse(json), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_wire_unsafe_ids() {
        let json = r#"{
            channels: { definitions: [ { id: "R,0", direction: "readable" } ] },
        }"#;

        assert!(RegBridgeConfig::parse(json).is_err());
    }

    #[test]
    fn test_validate_requires_readable_channel() {
        assert!(RegBridgeConfig::parse("{ channels: { readable: 0 } }").is_err());
    }

    #[test]
    fn test_validate_serial_settings() {
        assert!(RegBridgeConfig::parse(r#"{ serial: { parity: "mark" } }"#).is_err());
        assert!(RegBridgeConfig::parse(r#"{ serial: { stop_bits: 3 } }"#).is_err());
        assert!(RegBridgeConfig::parse(r#"{ serial: { baud_rate: 0 } }"#).is_err());
        assert!(RegBridgeConfig::parse(r#"{ bridge: { poll_interval_ms: 0 } }"#).is_err());
        assert!(RegBridgeConfig::parse(r#"{ bridge: { device: "a*" } }"#).is_err());
    }
}
