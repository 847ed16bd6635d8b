//! Integration tests for regbridge-common.

use regbridge_common::{
    ChannelDefinition, ChannelKeys, Diagnostic, Direction, Format, Reading, ReadingStatus,
    Severity, WriteCommand, decode, decode_auto, encode,
};

#[test]
fn test_reading_workflow() {
    let keys = ChannelKeys::new("regbridge", "arduino");
    let readings: Vec<Reading> = ["R0", "R1", "R2", "R3"]
        .iter()
        .zip([10, 20, 30, 40])
        .map(|(id, value)| Reading::ok(*id, value, 1_700_000_000_000))
        .collect();

    for reading in &readings {
        let key = keys.reading(&reading.id);
        assert!(key.starts_with("regbridge/arduino/R"));

        let json = encode(reading, Format::Json).expect("JSON encode failed");
        let decoded: Reading = decode(&json, Format::Json).expect("JSON decode failed");
        assert_eq!(&decoded, reading);
        assert_eq!(decoded.status, ReadingStatus::Ok);
    }
}

#[test]
fn test_command_payload_variants() {
    let expected = WriteCommand::new("W1", 77);

    let json = encode(&expected, Format::Json).unwrap();
    let cbor = encode(&expected, Format::Cbor).unwrap();

    assert_eq!(WriteCommand::from_payload(&json).unwrap(), expected);
    assert_eq!(WriteCommand::from_payload(&cbor).unwrap(), expected);
    assert_eq!(WriteCommand::from_payload(b"W1=77\n").unwrap(), expected);
    assert!(WriteCommand::from_payload(b"garbage").is_err());
}

#[test]
fn test_channel_announcement_decodes_on_host() {
    let layout = ChannelDefinition::layout(2, 1);
    let payload = encode(&layout, Format::Json).unwrap();

    let decoded: Vec<ChannelDefinition> = decode_auto(&payload).unwrap();
    assert_eq!(decoded.len(), 3);
    assert_eq!(decoded[2].id, "W0");
    assert_eq!(decoded[2].direction, Direction::Writable);
}

#[test]
fn test_diagnostic_roundtrip() {
    let diagnostic = Diagnostic::new("Field count mismatch: expected 4, got 3", Severity::Warn);
    let payload = encode(&diagnostic, Format::Cbor).unwrap();

    let decoded: Diagnostic = decode(&payload, Format::Cbor).unwrap();
    assert_eq!(decoded.severity, Severity::Warn);
    assert!(decoded.text.contains("expected 4"));
    assert!(decoded.timestamp > 0);
}

#[test]
fn test_severity_ordering() {
    assert!(Severity::Debug < Severity::Info);
    assert!(Severity::Warn < Severity::Error);
}
