use crate::record::LogRecord;
use crate::sink::{LogSink, SinkError};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Console sink that prints each record as one flattened JSON object per
/// line on stdout.
///
/// The whole batch is rendered first and written with a single call so
/// lines from concurrent destinations do not interleave mid-record.
#[derive(Clone, Default)]
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn new() -> Self {
        ConsoleSink
    }
}

/// Render a batch as newline-delimited flat JSON.
pub fn render_json_lines(batch: &[Arc<LogRecord>]) -> Result<String, serde_json::Error> {
    let mut out = String::with_capacity(batch.len() * 128);
    for record in batch {
        out.push_str(&serde_json::to_string(&record.to_flat_json())?);
        out.push('\n');
    }
    Ok(out)
}

#[async_trait]
impl LogSink for ConsoleSink {
    async fn store(&self, batch: &[Arc<LogRecord>]) -> Result<(), SinkError> {
        let body = render_json_lines(batch)?;
        let mut stdout = tokio::io::stdout();
        stdout.write_all(body.as_bytes()).await?;
        stdout.flush().await?;
        Ok(())
    }
}
