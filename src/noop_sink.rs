use crate::record::LogRecord;
use crate::sink::{LogSink, SinkError};
use async_trait::async_trait;
use std::sync::Arc;

/// A sink that simply drops all records.
///
/// Useful for measuring the overhead of routing and batching without any
/// external I/O, e.g. when driving the gateway with `loggen`.
#[derive(Clone, Default)]
pub struct NoopSink;

#[async_trait]
impl LogSink for NoopSink {
    async fn store(&self, _batch: &[Arc<LogRecord>]) -> Result<(), SinkError> {
        Ok(())
    }
}
