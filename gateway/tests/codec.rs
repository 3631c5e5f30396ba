//! Wire codec properties.

use ccugw::{ProcessValue, Status, Tier, Value, decode, decode_tiered, encode};
use chrono::{TimeZone, Utc};

#[test]
fn test_round_trip_scalars() {
    let timestamp = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
    let values = [
        Value::Null,
        Value::Bool(false),
        Value::Int(i64::MIN),
        Value::Int(42),
        Value::Float(0.1),
        Value::Float(-1e300),
        Value::Float(1.0),
        Value::String(String::new()),
        Value::String("42".to_string()),
        Value::String("Küche \"oben\" \\ /".to_string()),
    ];

    for (i, value) in values.into_iter().enumerate() {
        let status = [Status::Good, Status::Uncertain, Status::Bad][i % 3];
        let pv = ProcessValue::now(value)
            .with_timestamp(timestamp)
            .with_status(status);

        let payload = encode(&pv).unwrap();
        let (back, tier) = decode_tiered(&payload);

        assert_eq!(tier, Tier::Strict, "payload {}", String::from_utf8_lossy(&payload));
        assert_eq!(back.value, pv.value);
        assert_eq!(back.status, pv.status);
        assert_eq!(back.millis(), 1_700_000_000_123);
    }
}

#[test]
fn test_decode_is_total() {
    // deterministic pseudo-random payloads
    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state
    };

    for _ in 0..500 {
        let len = (next() % 64) as usize;
        let payload: Vec<u8> = (0..len).map(|_| next() as u8).collect();
        let (pv, tier) = decode_tiered(&payload);
        assert_eq!(pv.status, Status::Good);
        if tier == Tier::Raw {
            assert_eq!(pv.value, Value::String(String::from_utf8_lossy(&payload).into_owned()));
        }
    }

    for payload in [&b""[..], b"{", b"}", b"[1,", b"\xff\xff", b"\"unterminated", b"{\"ts\":\"yesterday\"}"] {
        let _ = decode(payload);
    }
}

#[test]
fn test_zero_timestamp_means_now() {
    let before = Utc::now();
    let pv = decode(br#"{"v":1,"ts":0,"s":0}"#);
    let after = Utc::now();
    assert!(pv.timestamp >= before - chrono::Duration::milliseconds(1));
    assert!(pv.timestamp <= after);
    assert_eq!(pv.value, Value::Int(1));
}

#[test]
fn test_wrong_field_type_falls_to_generic() {
    let (pv, tier) = decode_tiered(br#"{"v":1,"ts":"yesterday"}"#);
    assert_eq!(tier, Tier::Generic);
    assert!(matches!(pv.value, Value::Structured(_)));
}
