//! Datagram payload -> [`LogRecord`].
//!
//! Payloads are JSON objects. The fixed attributes are taken out first;
//! every other top-level key ends up in `fields`, so producers may send
//! either the canonical shape (with a nested `fields` object) or a flat one.
//! String values are stored exactly as received.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::record::LogRecord;

/// Numeric timestamps above this are taken as milliseconds since the epoch.
const MILLIS_THRESHOLD: f64 = 100_000_000_000.0;

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("missing required field '{0}'")]
    MissingField(&'static str),
}

/// Decode one datagram into a record.
///
/// A missing or unparseable timestamp is replaced by the arrival time.
/// Records without `app` or `service` are rejected.
pub fn decode_record(payload: &[u8]) -> Result<LogRecord, DecodeError> {
    let value: Value = serde_json::from_slice(payload)?;
    let Value::Object(mut object) = value else {
        return Err(DecodeError::NotAnObject);
    };

    let timestamp = take_first(&mut object, &["time", "timestamp", "ts"])
        .and_then(|v| parse_timestamp(&v))
        .unwrap_or_else(Utc::now);
    let level = take_string(&mut object, &["level", "severity"]);
    let app = take_string(&mut object, &["app"]);
    let service = take_string(&mut object, &["service"]);
    let message = take_string(&mut object, &["message", "msg"]);

    if app.trim().is_empty() {
        return Err(DecodeError::MissingField("app"));
    }
    if service.trim().is_empty() {
        return Err(DecodeError::MissingField("service"));
    }

    let mut fields: BTreeMap<String, Value> = BTreeMap::new();
    match object.remove("fields") {
        Some(Value::Object(nested)) => fields.extend(nested),
        Some(other) => {
            fields.insert("fields".to_string(), other);
        }
        None => {}
    }
    // Top-level extras win over nested ones with the same key.
    fields.extend(object);

    Ok(LogRecord {
        timestamp,
        level,
        app,
        service,
        message,
        fields,
    })
}

/// Remove the first alias present. Later aliases stay in the object and
/// end up in `fields`.
fn take_first(object: &mut Map<String, Value>, keys: &[&str]) -> Option<Value> {
    keys.iter().find_map(|key| object.remove(*key))
}

fn take_string(object: &mut Map<String, Value>, keys: &[&str]) -> String {
    match take_first(object, keys) {
        Some(Value::String(s)) => s,
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => {
            let n = n.as_f64()?;
            if !n.is_finite() || n < 0.0 {
                return None;
            }
            let millis = if n >= MILLIS_THRESHOLD { n } else { n * 1000.0 };
            Utc.timestamp_millis_opt(millis as i64).single()
        }
        _ => None,
    }
}
