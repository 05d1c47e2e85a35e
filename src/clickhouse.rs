use crate::record::LogRecord;
use crate::sink::{LogSink, SinkError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;

/// Configuration for [`ClickHouseSink`].
///
/// The sink talks to ClickHouse over HTTP using the `JSONEachRow` format,
/// sending one `INSERT` per batch.
#[derive(Clone, Debug)]
pub struct ClickHouseConfig {
    /// Base URL without query, e.g. "http://127.0.0.1:8123"
    pub url: String,
    pub database: String,
    pub table: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

/// ClickHouse implementation of [`LogSink`] using the HTTP interface.
#[derive(Clone)]
pub struct ClickHouseSink {
    client: Client,
    config: ClickHouseConfig,
}

impl ClickHouseSink {
    /// Construct a new sink instance using the provided configuration.
    ///
    /// **Parameters**
    /// - `config`: [`ClickHouseConfig`] describing target URL, database,
    ///   table and optional authentication settings.
    pub fn new(config: ClickHouseConfig) -> Self {
        let client = Client::new();
        Self { client, config }
    }

    pub(crate) fn endpoint(&self) -> String {
        let mut query = format!(
            "database={}&query=INSERT%20INTO%20{}%20FORMAT%20JSONEachRow",
            urlencoding::encode(&self.config.database),
            urlencoding::encode(&self.config.table)
        );

        if let Some(user) = &self.config.user {
            query.push_str(&format!("&user={}", urlencoding::encode(user)));
        }
        if let Some(password) = &self.config.password {
            query.push_str(&format!("&password={}", urlencoding::encode(password)));
        }

        format!("{}/?{}", self.config.url.trim_end_matches('/'), query)
    }

    fn map_record(record: &LogRecord) -> ClickHouseRow<'_> {
        ClickHouseRow {
            timestamp: record.timestamp.to_rfc3339(),
            level: &record.level,
            app: &record.app,
            service: &record.service,
            message: &record.message,
            fields: serde_json::to_string(&record.fields).unwrap_or_else(|_| "{}".to_string()),
        }
    }

    pub(crate) fn body(batch: &[Arc<LogRecord>]) -> Result<String, serde_json::Error> {
        let mut body = String::with_capacity(batch.len() * 160);
        for record in batch {
            body.push_str(&serde_json::to_string(&Self::map_record(record))?);
            body.push('\n');
        }
        Ok(body)
    }
}

#[derive(Serialize)]
struct ClickHouseRow<'a> {
    timestamp: String,
    level: &'a str,
    app: &'a str,
    service: &'a str,
    message: &'a str,
    fields: String,
}

#[async_trait]
impl LogSink for ClickHouseSink {
    async fn store(&self, batch: &[Arc<LogRecord>]) -> Result<(), SinkError> {
        let body = Self::body(batch)?;
        let resp = self.client.post(self.endpoint()).body(body).send().await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_else(|_| "<no body>".to_string());
            Err(format!("ClickHouse insert failed with status {}: {}", status, text).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ClickHouseConfig {
        ClickHouseConfig {
            url: "http://127.0.0.1:8123/".to_string(),
            database: "default".to_string(),
            table: "logs".to_string(),
            user: Some("svc user".to_string()),
            password: None,
        }
    }

    #[test]
    fn endpoint_encodes_credentials() {
        let sink = ClickHouseSink::new(config());
        assert_eq!(
            sink.endpoint(),
            "http://127.0.0.1:8123/?database=default&query=INSERT%20INTO%20logs%20FORMAT%20JSONEachRow&user=svc%20user"
        );
    }

    #[test]
    fn body_has_one_row_per_record() {
        let batch = vec![
            Arc::new(LogRecord::new("info", "shop", "cart", "a").with_field("k", "v")),
            Arc::new(LogRecord::new("error", "shop", "pay", "b")),
        ];
        let body = ClickHouseSink::body(&batch).unwrap();
        let rows: Vec<serde_json::Value> = body.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["fields"], "{\"k\":\"v\"}");
        assert_eq!(rows[1]["level"], "error");
    }
}
