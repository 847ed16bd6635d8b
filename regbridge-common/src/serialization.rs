use serde::{Serialize, de::DeserializeOwned};

use crate::error::{Error, Result};

/// Serialization format for readings and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// JSON format (human-readable, default).
    #[default]
    Json,

    /// CBOR format (compact binary).
    Cbor,
}

impl Format {
    /// Get the MIME type for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Format::Json => "application/json",
            Format::Cbor => "application/cbor",
        }
    }
}

/// Encode a value to bytes using the specified format.
pub fn encode<T: Serialize>(value: &T, format: Format) -> Result<Vec<u8>> {
    match format {
        Format::Json => serde_json::to_vec(value).map_err(Error::from),
        Format::Cbor => {
            let mut buf = Vec::new();
            ciborium::into_writer(value, &mut buf)?;
            Ok(buf)
        }
    }
}

/// Decode bytes to a value using the specified format.
pub fn decode<T: DeserializeOwned>(data: &[u8], format: Format) -> Result<T> {
    match format {
        Format::Json => serde_json::from_slice(data).map_err(Error::from),
        Format::Cbor => ciborium::from_reader(data).map_err(|e| Error::Cbor(e.to_string())),
    }
}

/// Guess the format of a payload.
///
/// Anything starting with `{`, `[`, `"` or an ASCII digit/sign is treated as JSON.
pub fn detect_format(data: &[u8]) -> Format {
    match data.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'{') | Some(b'[') | Some(b'"') | Some(b'-') | Some(b'0'..=b'9') => Format::Json,
        _ => Format::Cbor,
    }
}

/// Decode bytes, auto-detecting the format.
pub fn decode_auto<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    decode(data, detect_format(data))
}

/// Decode a scalar integer payload such as a host setpoint.
///
/// Accepts a JSON/CBOR integer, decimal text, or a JSON object with a `value`
/// field. Fractional and out-of-range numbers are rejected.
pub fn decode_integer(data: &[u8]) -> Option<i64> {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(value) = text.trim().parse::<i64>() {
            return Some(value);
        }
    }

    match decode_auto::<serde_json::Value>(data).ok()? {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::Object(map) => map.get("value").and_then(|v| v.as_i64()),
        _ => None,
    }
}
