use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

/// Direction of a channel as seen by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Value is read from the device and published to the host.
    Readable,
    /// Value is set by the host and pushed to the device.
    Writable,
}

impl Direction {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Readable => "readable",
            Direction::Writable => "writable",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A named, directioned data point exposed to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDefinition {
    /// Channel identifier (e.g., "R0", "W3").
    pub id: String,

    /// Channel direction.
    pub direction: Direction,

    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ChannelDefinition {
    /// Create a readable channel definition.
    pub fn readable(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            direction: Direction::Readable,
            description: None,
        }
    }

    /// Create a writable channel definition.
    pub fn writable(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            direction: Direction::Writable,
            description: None,
        }
    }

    /// Attach a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Generate the conventional `R0..Rn` / `W0..Wm` layout.
    pub fn layout(readable: usize, writable: usize) -> Vec<Self> {
        let reads = (0..readable)
            .map(|i| Self::readable(format!("R{}", i)).with_description(format!("Read {}", i)));
        let writes = (0..writable)
            .map(|i| Self::writable(format!("W{}", i)).with_description(format!("Write {}", i)));
        reads.chain(writes).collect()
    }
}

/// Quality of a published reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingStatus {
    /// Value was decoded from the device frame.
    Ok,
    /// The device sent an unparsable token; the value was substituted with 0.
    Coerced,
}

/// A single channel reading published to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Channel identifier.
    pub id: String,

    /// Observed value.
    pub value: i64,

    /// Unix epoch milliseconds when the frame was decoded.
    pub timestamp: i64,

    /// Reading quality.
    pub status: ReadingStatus,
}

impl Reading {
    /// Create a reading with status `ok`.
    pub fn ok(id: impl Into<String>, value: i64, timestamp: i64) -> Self {
        Self {
            id: id.into(),
            value,
            timestamp,
            status: ReadingStatus::Ok,
        }
    }
}

/// A host request to set a writable channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteCommand {
    /// Target channel identifier.
    pub id: String,

    /// Value to command.
    pub value: i64,
}

impl WriteCommand {
    /// Create a new write command.
    pub fn new(id: impl Into<String>, value: i64) -> Self {
        Self {
            id: id.into(),
            value,
        }
    }

    /// Parse the device-style text form `<id>=<value>`.
    ///
    /// # Example
    /// ```
    /// use regbridge_common::WriteCommand;
    ///
    /// let cmd = WriteCommand::parse_text("W1=77").unwrap();
    /// assert_eq!(cmd, WriteCommand::new("W1", 77));
    /// ```
    pub fn parse_text(text: &str) -> Result<Self> {
        let (id, value) = text
            .trim()
            .split_once('=')
            .ok_or_else(|| Error::Command(format!("expected '<id>=<value>', got '{}'", text)))?;

        let id = id.trim();
        if id.is_empty() {
            return Err(Error::Command("empty channel id".to_string()));
        }

        let value = value
            .trim()
            .parse::<i64>()
            .map_err(|e| Error::Command(format!("invalid value for '{}': {}", id, e)))?;

        Ok(Self::new(id, value))
    }

    /// Parse a command payload: JSON or CBOR object, or the text form.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        if let Ok(cmd) = crate::serialization::decode_auto::<WriteCommand>(payload) {
            return Ok(cmd);
        }

        let text = std::str::from_utf8(payload)
            .map_err(|_| Error::Command("payload is neither structured nor UTF-8".to_string()))?;
        Self::parse_text(text)
    }
}

/// Severity of a diagnostic forwarded to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

impl Severity {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A diagnostic message as published on the diagnostics key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Unix epoch milliseconds.
    pub timestamp: i64,
    /// Message severity.
    pub severity: Severity,
    /// Free-form text.
    pub text: String,
}

impl Diagnostic {
    /// Create a diagnostic stamped with the current time.
    pub fn new(text: impl Into<String>, severity: Severity) -> Self {
        Self {
            timestamp: current_timestamp_millis(),
            severity,
            text: text.into(),
        }
    }
}

/// Get the current timestamp in milliseconds since Unix epoch.
///
/// Returns 0 if system time is before Unix epoch.
pub fn current_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let layout = ChannelDefinition::layout(4, 4);
        let ids: Vec<_> = layout.iter().map(|c| c.id.as_str()).collect();

        assert_eq!(ids, vec!["R0", "R1", "R2", "R3", "W0", "W1", "W2", "W3"]);
        assert!(layout[..4].iter().all(|c| c.direction == Direction::Readable));
        assert!(layout[4..].iter().all(|c| c.direction == Direction::Writable));
        assert_eq!(layout[5].description.as_deref(), Some("Write 1"));
    }

    #[test]
    fn test_parse_text_command() {
        assert_eq!(
            WriteCommand::parse_text(" W2 = -15 \n").unwrap(),
            WriteCommand::new("W2", -15)
        );
        assert!(WriteCommand::parse_text("W2").is_err());
        assert!(WriteCommand::parse_text("=5").is_err());
        assert!(WriteCommand::parse_text("W2=abc").is_err());
    }

    #[test]
    fn test_command_from_json_payload() {
        let cmd = WriteCommand::from_payload(br#"{"id": "W1", "value": 77}"#).unwrap();
        assert_eq!(cmd, WriteCommand::new("W1", 77));
    }

    #[test]
    fn test_command_from_text_payload() {
        let cmd = WriteCommand::from_payload(b"W3=42").unwrap();
        assert_eq!(cmd, WriteCommand::new("W3", 42));
    }

    #[test]
    fn test_reading_serialization() {
        let reading = Reading::ok("R0", 10, 1_700_000_000_000);
        let json = serde_json::to_string(&reading).unwrap();

        assert!(json.contains("\"id\":\"R0\""));
        assert!(json.contains("\"status\":\"ok\""));

        let coerced = Reading {
            status: ReadingStatus::Coerced,
            ..reading
        };
        assert!(serde_json::to_string(&coerced).unwrap().contains("\"coerced\""));
    }

    #[test]
    fn test_direction_deserialize() {
        let def: ChannelDefinition =
            serde_json::from_str(r#"{"id": "W0", "direction": "writable"}"#).unwrap();
        assert_eq!(def.direction, Direction::Writable);
        assert!(def.description.is_none());
    }
}
