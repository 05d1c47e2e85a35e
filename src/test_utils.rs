//! Sinks and helpers for exercising the service without real backends.
//!
//! These are real [`LogSink`] implementations, not mocks: they go through the
//! same worker and flush path as the console or file backends.

use crate::record::LogRecord;
use crate::sink::{LogSink, SinkError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Build a record with fixed attributes and the given message.
pub fn record(message: &str) -> LogRecord {
    LogRecord::new("info", "test-app", "x", message)
}

/// Records every batch it receives, in order.
#[derive(Default)]
pub struct MemorySink {
    batches: Mutex<Vec<Vec<Arc<LogRecord>>>>,
    closed: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn batches(&self) -> Vec<Vec<Arc<LogRecord>>> {
        self.batches.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Messages of every stored batch, preserving batch boundaries.
    pub fn batch_messages(&self) -> Vec<Vec<String>> {
        self.batches()
            .iter()
            .map(|b| b.iter().map(|r| r.message.clone()).collect())
            .collect()
    }

    /// Messages of every stored record, in flush order.
    pub fn messages(&self) -> Vec<String> {
        self.batch_messages().into_iter().flatten().collect()
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Yield to the runtime until at least `n` batches were stored.
    ///
    /// Gives up after one simulated second so a broken worker fails the
    /// calling test's assertions instead of hanging it.
    pub async fn wait_for_batches(&self, n: usize) {
        for _ in 0..1000 {
            if self.batch_count() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

#[async_trait]
impl LogSink for MemorySink {
    async fn store(&self, batch: &[Arc<LogRecord>]) -> Result<(), SinkError> {
        self.batches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(batch.to_vec());
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Fails the first `failures` store calls, then behaves like [`MemorySink`].
pub struct FailingSink {
    remaining_failures: AtomicUsize,
    inner: Arc<MemorySink>,
}

impl FailingSink {
    pub fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            remaining_failures: AtomicUsize::new(failures),
            inner: MemorySink::new(),
        })
    }

    pub fn inner(&self) -> &MemorySink {
        &self.inner
    }
}

#[async_trait]
impl LogSink for FailingSink {
    async fn store(&self, batch: &[Arc<LogRecord>]) -> Result<(), SinkError> {
        let failed = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err("backend unavailable".into());
        }
        self.inner.store(batch).await
    }

    async fn close(&self) -> Result<(), SinkError> {
        Err("close failed".into())
    }
}

/// Never completes a store call.
#[derive(Default)]
pub struct StallingSink;

impl StallingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(StallingSink)
    }
}

#[async_trait]
impl LogSink for StallingSink {
    async fn store(&self, _batch: &[Arc<LogRecord>]) -> Result<(), SinkError> {
        std::future::pending::<()>().await;
        Ok(())
    }
}
