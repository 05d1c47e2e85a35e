use crate::record::LogRecord;
use async_trait::async_trait;
use std::error::Error;
use std::sync::Arc;

/// Error returned by storage backends.
pub type SinkError = Box<dyn Error + Send + Sync>;

/// Storage capability behind one configured destination.
///
/// Implementations are responsible for transporting records to a concrete
/// backend (console, file, ClickHouse, etc). The destination worker calls
/// `store` from its own Tokio task; ingestion never awaits it.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Persist a batch of records.
    ///
    /// **Parameters**
    /// - `batch`: non-empty, ordered slice of records accumulated by one
    ///   destination worker since its previous flush.
    ///
    /// **Returns**
    /// - `Ok(())` if the backend accepted every record in the batch.
    /// - `Err(..)` otherwise. There is no partial acknowledgment: the worker
    ///   treats the whole batch as lost and does not retry.
    async fn store(&self, batch: &[Arc<LogRecord>]) -> Result<(), SinkError>;

    /// Release backend resources once the destination has been drained.
    ///
    /// Default implementation is a no-op.
    async fn close(&self) -> Result<(), SinkError> {
        Ok(())
    }
}
