//! Wire codec for process values.
//!
//! The wire form is a JSON object `{"v":..,"ts":..,"s":..}` with the value,
//! a Unix millisecond timestamp and a status code. Decoding is lenient and
//! never fails; it tries, in this order:
//!
//! 1. [`Tier::Strict`]: the wire object, no other fields, nothing but
//!    whitespace after it. A missing or null `ts` or `s` counts as 0.
//! 2. [`Tier::Generic`]: any JSON value, taken as the value.
//! 3. [`Tier::Raw`]: the whole payload as a string. Accepts anything.

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::pv::{ProcessValue, Status, Value};

/// Decoding stage that produced a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Strict,
    Generic,
    Raw,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WireIn {
    #[serde(default)]
    v: serde_json::Value,
    #[serde(default)]
    ts: Option<i64>,
    #[serde(default)]
    s: Option<i64>,
}

#[derive(Debug, Serialize)]
struct WireOut {
    v: serde_json::Value,
    ts: i64,
    s: i64,
}

type Attempt = fn(&[u8]) -> Option<ProcessValue>;

const TIERS: [(Tier, Attempt); 2] = [(Tier::Strict, decode_strict), (Tier::Generic, decode_generic)];

/// Decode a payload into a process value. Never fails.
pub fn decode(payload: &[u8]) -> ProcessValue {
    decode_tiered(payload).0
}

/// Decode a payload and report which tier accepted it.
pub fn decode_tiered(payload: &[u8]) -> (ProcessValue, Tier) {
    for (tier, attempt) in TIERS {
        if let Some(pv) = attempt(payload) {
            return (pv, tier);
        }
    }
    (decode_raw(payload), Tier::Raw)
}

/// Encode a process value as a wire message. The timestamp is truncated to
/// milliseconds.
pub fn encode(pv: &ProcessValue) -> Result<Bytes> {
    let v = pv
        .value
        .to_scalar_json()
        .ok_or_else(|| Error::Encoding(format!("value {} is not a wire scalar", pv.value)))?;
    let wire = WireOut {
        v,
        ts: pv.millis(),
        s: pv.status.code(),
    };
    serde_json::to_vec(&wire)
        .map(Bytes::from)
        .map_err(|e| Error::Encoding(e.to_string()))
}

fn decode_strict(payload: &[u8]) -> Option<ProcessValue> {
    // serde_json rejects trailing non-whitespace input
    let wire: WireIn = serde_json::from_slice(payload).ok()?;
    let pv = ProcessValue::now(Value::from(wire.v)).with_status(Status::from_code(wire.s.unwrap_or(0)));
    Some(match wire.ts {
        None | Some(0) => pv,
        Some(ts) => pv.with_millis(ts),
    })
}

fn decode_generic(payload: &[u8]) -> Option<ProcessValue> {
    let v: serde_json::Value = serde_json::from_slice(payload).ok()?;
    Some(ProcessValue::now(Value::from(v)))
}

fn decode_raw(payload: &[u8]) -> ProcessValue {
    ProcessValue {
        timestamp: Utc::now(),
        value: Value::String(String::from_utf8_lossy(payload).into_owned()),
        status: Status::Good,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_tier() {
        let (pv, tier) = decode_tiered(br#"{"v":123.456,"ts":1483228800000,"s":0}"#);
        assert_eq!(tier, Tier::Strict);
        assert_eq!(pv.value, Value::Float(123.456));
        assert_eq!(pv.millis(), 1_483_228_800_000);
        assert_eq!(pv.status, Status::Good);

        let (pv, tier) = decode_tiered(b" {\"v\":true,\"s\":100}\n ");
        assert_eq!(tier, Tier::Strict);
        assert_eq!(pv.value, Value::Bool(true));
        assert_eq!(pv.status, Status::Uncertain);
    }

    #[test]
    fn test_strict_defaults() {
        let before = Utc::now().timestamp_millis();
        let (pv, tier) = decode_tiered(br#"{"v":"x","ts":0}"#);
        assert_eq!(tier, Tier::Strict);
        assert!(pv.millis() >= before);
        assert_eq!(pv.status, Status::Good);

        let (pv, tier) = decode_tiered(b"{}");
        assert_eq!(tier, Tier::Strict);
        assert_eq!(pv.value, Value::Null);
    }

    #[test]
    fn test_strict_null_status() {
        let (pv, tier) = decode_tiered(br#"{"v":1,"s":null}"#);
        assert_eq!(tier, Tier::Strict);
        assert_eq!(pv.value, Value::Int(1));
        assert_eq!(pv.status, Status::Good);
    }

    #[test]
    fn test_strict_null_timestamp() {
        let before = Utc::now().timestamp_millis();
        let (pv, tier) = decode_tiered(br#"{"v":1,"ts":null,"s":200}"#);
        assert_eq!(tier, Tier::Strict);
        assert_eq!(pv.value, Value::Int(1));
        assert!(pv.millis() >= before);
        assert_eq!(pv.status, Status::Bad);
    }

    #[test]
    fn test_unknown_field_falls_to_generic() {
        let (pv, tier) = decode_tiered(br#"{"v":1,"unit":"C"}"#);
        assert_eq!(tier, Tier::Generic);
        assert_eq!(pv.value, Value::Structured(serde_json::json!({"v": 1, "unit": "C"})));
        assert_eq!(pv.status, Status::Good);
    }

    #[test]
    fn test_trailing_content_falls_to_raw() {
        let payload = br#"{"v":1} {"v":2}"#;
        let (pv, tier) = decode_tiered(payload);
        assert_eq!(tier, Tier::Raw);
        assert_eq!(pv.value, Value::String(r#"{"v":1} {"v":2}"#.to_string()));
    }

    #[test]
    fn test_generic_scalars() {
        let cases: [(&[u8], Value); 5] = [
            (b"42", Value::Int(42)),
            (b"-0.25", Value::Float(-0.25)),
            (b"false", Value::Bool(false)),
            (b"null", Value::Null),
            (br#""ON""#, Value::String("ON".to_string())),
        ];
        for (payload, want) in cases {
            let (pv, tier) = decode_tiered(payload);
            assert_eq!(tier, Tier::Generic, "payload {:?}", payload);
            assert_eq!(pv.value, want);
            assert_eq!(pv.status, Status::Good);
        }
    }

    #[test]
    fn test_raw_tier_is_total() {
        assert_eq!(decode_tiered(b"").1, Tier::Raw);
        assert_eq!(decode(b"").value, Value::String(String::new()));
        assert_eq!(decode(b"hello world").value, Value::String("hello world".to_string()));
        assert_eq!(decode(b"{\"v\":").value, Value::String("{\"v\":".to_string()));

        let (pv, tier) = decode_tiered(&[0xff, 0xfe, 0x00, 0x41]);
        assert_eq!(tier, Tier::Raw);
        assert_eq!(pv.value, Value::String("\u{fffd}\u{fffd}\u{0}A".to_string()));
    }

    #[test]
    fn test_encode_field_order() {
        let pv = ProcessValue::now(42.5).with_millis(1_483_228_800_123);
        let out = encode(&pv).unwrap();
        assert_eq!(out.as_ref(), br#"{"v":42.5,"ts":1483228800123,"s":0}"#);

        let pv = ProcessValue::now(Value::Null).with_millis(1).with_status(Status::Bad);
        assert_eq!(encode(&pv).unwrap().as_ref(), br#"{"v":null,"ts":1,"s":200}"#);
    }

    #[test]
    fn test_encode_rejects_non_scalars() {
        let err = encode(&ProcessValue::now(f64::NAN)).unwrap_err();
        assert!(matches!(err, Error::Encoding(_)));
        assert!(err.is_publish_error());

        let structured = ProcessValue::now(Value::Structured(serde_json::json!([1, 2])));
        assert!(matches!(encode(&structured), Err(Error::Encoding(_))));
    }
}
