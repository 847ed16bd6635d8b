/// Default key expression prefix for the register bridge.
pub const KEY_PREFIX: &str = "regbridge";

/// Builder for the key expressions owned by one bridged device.
///
/// Layout:
///
/// ```text
/// <prefix>/<device>/<channel>              readings (bridge -> host)
/// <prefix>/<device>/setpoint/<channel>     write targets (host storage, queried)
/// <prefix>/<device>/@/commands/write       write commands (host -> bridge)
/// <prefix>/<device>/@/channels             channel definitions
/// <prefix>/<device>/@/diagnostics          diagnostics
/// <prefix>/<device>/@/status               bridge status
/// ```
///
/// The `@` segment marks administrative keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelKeys {
    base: String,
}

impl ChannelKeys {
    /// Create keys for a device under the given prefix.
    pub fn new(prefix: &str, device: &str) -> Self {
        Self {
            base: format!("{}/{}", prefix.trim_end_matches('/'), device),
        }
    }

    /// The `<prefix>/<device>` root.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Key for a channel reading.
    ///
    /// # Example
    /// ```
    /// use regbridge_common::ChannelKeys;
    ///
    /// let keys = ChannelKeys::new("regbridge", "arduino");
    /// assert_eq!(keys.reading("R0"), "regbridge/arduino/R0");
    /// ```
    pub fn reading(&self, channel: &str) -> String {
        format!("{}/{}", self.base, channel)
    }

    /// Key for a host-side setpoint of a writable channel.
    pub fn setpoint(&self, channel: &str) -> String {
        format!("{}/setpoint/{}", self.base, channel)
    }

    /// Selector matching every setpoint of this device.
    pub fn setpoint_selector(&self) -> String {
        format!("{}/setpoint/*", self.base)
    }

    /// Key on which write commands are received.
    pub fn write_commands(&self) -> String {
        format!("{}/@/commands/write", self.base)
    }

    /// Key on which channel definitions are announced.
    pub fn channels(&self) -> String {
        format!("{}/@/channels", self.base)
    }

    /// Key on which diagnostics are published.
    pub fn diagnostics(&self) -> String {
        format!("{}/@/diagnostics", self.base)
    }

    /// Key on which bridge status is published.
    pub fn status(&self) -> String {
        format!("{}/@/status", self.base)
    }

    /// Extract the channel id from a setpoint key of this device.
    pub fn parse_setpoint<'a>(&self, key: &'a str) -> Option<&'a str> {
        let channel = key
            .strip_prefix(self.base.as_str())?
            .strip_prefix("/setpoint/")?;

        if channel.is_empty() || channel.contains('/') {
            None
        } else {
            Some(channel)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_keys() {
        let keys = ChannelKeys::new("regbridge/", "arduino");

        assert_eq!(keys.base(), "regbridge/arduino");
        assert_eq!(keys.setpoint("W1"), "regbridge/arduino/setpoint/W1");
        assert_eq!(keys.setpoint_selector(), "regbridge/arduino/setpoint/*");
        assert_eq!(keys.write_commands(), "regbridge/arduino/@/commands/write");
        assert_eq!(keys.channels(), "regbridge/arduino/@/channels");
        assert_eq!(keys.diagnostics(), "regbridge/arduino/@/diagnostics");
        assert_eq!(keys.status(), "regbridge/arduino/@/status");
    }

    #[test]
    fn test_parse_setpoint() {
        let keys = ChannelKeys::new(KEY_PREFIX, "arduino");

        assert_eq!(
            keys.parse_setpoint("regbridge/arduino/setpoint/W2"),
            Some("W2")
        );
        assert_eq!(keys.parse_setpoint("regbridge/arduino/W2"), None);
        assert_eq!(keys.parse_setpoint("regbridge/other/setpoint/W2"), None);
        assert_eq!(keys.parse_setpoint("regbridge/arduino/setpoint/"), None);
        assert_eq!(keys.parse_setpoint("regbridge/arduino/setpoint/W2/x"), None);
    }
}
