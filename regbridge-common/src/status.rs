//! Bridge status reporting.

use serde::{Deserialize, Serialize};

/// Bridge status as published on `<prefix>/<device>/@/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeStatus {
    /// Bridge name.
    pub bridge: String,
    /// Bridge version.
    pub version: String,
    /// Current status ("running", "offline").
    pub status: String,
    /// Additional metadata (device, port, channels).
    #[serde(flatten)]
    pub metadata: serde_json::Value,
}

impl BridgeStatus {
    /// Create a new status with "running" state.
    pub fn running(bridge: impl Into<String>, version: impl Into<String>) -> Self {
        Self::with_state(bridge, version, "running")
    }

    /// Create a status with "offline" state.
    pub fn offline(bridge: impl Into<String>, version: impl Into<String>) -> Self {
        Self::with_state(bridge, version, "offline")
    }

    fn with_state(
        bridge: impl Into<String>,
        version: impl Into<String>,
        status: &str,
    ) -> Self {
        Self {
            bridge: bridge.into(),
            version: version.into(),
            status: status.to_string(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Add metadata to the status.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_with_metadata() {
        let status = BridgeStatus::running("regbridge", "0.1.0").with_metadata(serde_json::json!({
            "device": "arduino",
            "channels": ["R0", "W0"]
        }));

        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"status\":\"running\""));
        assert!(json.contains("\"device\":\"arduino\""));
        assert_eq!(status.metadata["channels"][1], "W0");
    }

    #[test]
    fn test_status_offline() {
        let status = BridgeStatus::offline("regbridge", "0.1.0");
        assert_eq!(status.status, "offline");
        assert!(status.metadata.is_null());
    }
}
