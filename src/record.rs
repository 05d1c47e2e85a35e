use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One structured log event as it flows through the gateway.
///
/// Records are wrapped in `Arc` once they are ingested and never mutated
/// afterwards, so fan-out to several destinations only clones the pointer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(rename = "time")]
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub app: String,
    pub service: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl LogRecord {
    /// Build a record stamped with the current time and no extra fields.
    pub fn new(
        level: impl Into<String>,
        app: impl Into<String>,
        service: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        LogRecord {
            timestamp: Utc::now(),
            level: level.into(),
            app: app.into(),
            service: service.into(),
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Flatten the record into a single JSON object.
    ///
    /// Extra fields are written first so the fixed attributes always win
    /// when a producer reuses one of their names.
    pub fn to_flat_json(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut flat = serde_json::Map::with_capacity(5 + self.fields.len());
        for (k, v) in &self.fields {
            flat.insert(k.clone(), v.clone());
        }
        flat.insert(
            "time".to_string(),
            serde_json::Value::String(self.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)),
        );
        flat.insert("level".to_string(), self.level.clone().into());
        flat.insert("app".to_string(), self.app.clone().into());
        flat.insert("service".to_string(), self.service.clone().into());
        flat.insert("message".to_string(), self.message.clone().into());
        flat
    }
}
