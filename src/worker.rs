use crate::record::LogRecord;
use crate::sink::LogSink;
use crate::stats::DestinationCounters;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Batching parameters for one destination worker.
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub batch_size: usize,
    pub batch_timeout: Duration,
    /// Upper bound on the final drain-and-flush after shutdown.
    pub shutdown_grace: Duration,
}

impl WorkerSettings {
    /// Enforce minimal thresholds to avoid degenerate configs.
    pub fn sanitized(self) -> Self {
        Self {
            batch_size: self.batch_size.max(1),
            batch_timeout: self.batch_timeout.max(Duration::from_millis(10)),
            shutdown_grace: self.shutdown_grace,
        }
    }
}

/// Owns the delivery pipeline of exactly one destination: the receiving end
/// of its bounded buffer, the current batch and the flush timer.
pub struct DestinationWorker {
    name: String,
    sink: Arc<dyn LogSink>,
    buffer: mpsc::Receiver<Arc<LogRecord>>,
    settings: WorkerSettings,
    counters: Arc<DestinationCounters>,
    shutdown: CancellationToken,
}

impl DestinationWorker {
    pub fn new(
        name: impl Into<String>,
        sink: Arc<dyn LogSink>,
        buffer: mpsc::Receiver<Arc<LogRecord>>,
        settings: WorkerSettings,
        counters: Arc<DestinationCounters>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            name: name.into(),
            sink,
            buffer,
            settings: settings.sanitized(),
            counters,
            shutdown,
        }
    }

    /// Accumulate and flush until shutdown is signalled or every sender is
    /// dropped, then drain what is left in the buffer and flush it once.
    pub async fn run(mut self) {
        let batch_size = self.settings.batch_size;
        let period = self.settings.batch_timeout;
        let mut batch: Vec<Arc<LogRecord>> = Vec::with_capacity(batch_size);

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(destination = %self.name, batch_size, ?period, "destination worker started");

        loop {
            tokio::select! {
                received = self.buffer.recv() => match received {
                    Some(record) => {
                        batch.push(record);
                        if batch.len() >= batch_size {
                            self.flush(&mut batch).await;
                            ticker.reset();
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    if !batch.is_empty() {
                        self.flush(&mut batch).await;
                    }
                }
                _ = self.shutdown.cancelled() => break,
            }
        }

        let name = self.name.clone();
        self.drain(batch).await;
        tracing::debug!(destination = %name, "destination worker stopped");
    }

    async fn flush(&self, batch: &mut Vec<Arc<LogRecord>>) {
        self.store(batch).await;
        batch.clear();
    }

    async fn store(&self, records: &[Arc<LogRecord>]) {
        let count = records.len() as u64;
        match self.sink.store(records).await {
            Ok(()) => {
                self.counters.records_flushed.fetch_add(count, Ordering::Relaxed);
                self.counters.batches_flushed.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(destination = %self.name, records = count, "batch stored");
            }
            Err(e) => {
                self.counters.batches_failed.fetch_add(1, Ordering::Relaxed);
                self.counters.records_lost.fetch_add(count, Ordering::Relaxed);
                tracing::error!(
                    destination = %self.name,
                    records = count,
                    error = %e,
                    "failed to store batch, dropping it"
                );
            }
        }
    }

    async fn drain(mut self, mut batch: Vec<Arc<LogRecord>>) {
        // Closing first turns late `try_send` calls into `Closed` while
        // everything already admitted stays receivable.
        self.buffer.close();
        while let Ok(record) = self.buffer.try_recv() {
            batch.push(record);
        }
        if batch.is_empty() {
            return;
        }

        let total = batch.len();
        let mut stored = 0usize;
        let grace = self.settings.shutdown_grace;
        let chunk_size = self.settings.batch_size;

        let result = timeout(grace, async {
            for chunk in batch.chunks(chunk_size) {
                self.store(chunk).await;
                stored += chunk.len();
            }
        })
        .await;

        if result.is_err() {
            let abandoned = (total - stored) as u64;
            self.counters.records_lost.fetch_add(abandoned, Ordering::Relaxed);
            tracing::error!(
                destination = %self.name,
                abandoned,
                ?grace,
                "final flush exceeded shutdown grace period, abandoning batch"
            );
        } else {
            tracing::info!(destination = %self.name, records = total, "drained buffer on shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{record, FailingSink, MemorySink, StallingSink};

    const BIG: Duration = Duration::from_secs(3600);

    fn settings(batch_size: usize, batch_timeout: Duration) -> WorkerSettings {
        WorkerSettings {
            batch_size,
            batch_timeout,
            shutdown_grace: Duration::from_secs(1),
        }
    }

    fn spawn_worker(
        sink: Arc<dyn LogSink>,
        capacity: usize,
        settings: WorkerSettings,
    ) -> (
        mpsc::Sender<Arc<LogRecord>>,
        Arc<DestinationCounters>,
        CancellationToken,
        tokio::task::JoinHandle<()>,
    ) {
        let (tx, rx) = mpsc::channel(capacity);
        let counters = Arc::new(DestinationCounters::default());
        let shutdown = CancellationToken::new();
        let worker = DestinationWorker::new("d1", sink, rx, settings, counters.clone(), shutdown.clone());
        (tx, counters, shutdown, tokio::spawn(worker.run()))
    }

    #[tokio::test(start_paused = true)]
    async fn flushes_when_batch_is_full() {
        let sink = MemorySink::new();
        let (tx, counters, shutdown, handle) = spawn_worker(sink.clone(), 16, settings(3, BIG));

        for i in 0..7 {
            tx.try_send(Arc::new(record(&format!("m{i}")))).unwrap();
        }
        sink.wait_for_batches(2).await;

        assert_eq!(sink.batch_messages(), vec![vec!["m0", "m1", "m2"], vec!["m3", "m4", "m5"]]);

        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(sink.batch_messages().last().unwrap(), &vec!["m6"]);
        assert_eq!(counters.snapshot().records_flushed, 7);
        assert_eq!(counters.snapshot().batches_flushed, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn flushes_partial_batch_on_timeout() {
        let sink = MemorySink::new();
        let (tx, _counters, _shutdown, _handle) =
            spawn_worker(sink.clone(), 16, settings(100, Duration::from_millis(500)));

        tx.try_send(Arc::new(record("a"))).unwrap();
        tx.try_send(Arc::new(record("b"))).unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(sink.batch_count(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sink.batch_messages(), vec![vec!["a", "b"]]);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_batch_never_flushes() {
        let sink = MemorySink::new();
        let (_tx, _counters, shutdown, handle) =
            spawn_worker(sink.clone(), 16, settings(10, Duration::from_millis(50)));

        tokio::time::sleep(Duration::from_secs(5)).await;
        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(sink.batch_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drains_buffer_in_order() {
        let sink = MemorySink::new();
        let (tx, counters, shutdown, handle) = spawn_worker(sink.clone(), 16, settings(4, BIG));

        // Worker has not been polled yet, so all ten records are still
        // sitting in the buffer when shutdown is signalled.
        for i in 0..10 {
            tx.try_send(Arc::new(record(&format!("m{i}")))).unwrap();
        }
        shutdown.cancel();
        handle.await.unwrap();

        let flushed: Vec<String> = sink.batch_messages().into_iter().flatten().collect();
        let expected: Vec<String> = (0..10).map(|i| format!("m{i}")).collect();
        assert_eq!(flushed, expected);
        assert!(sink.batches().iter().all(|b| b.len() <= 4));
        assert_eq!(counters.snapshot().records_lost, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_all_senders_are_dropped() {
        let sink = MemorySink::new();
        let (tx, _counters, _shutdown, handle) = spawn_worker(sink.clone(), 16, settings(10, BIG));

        tx.try_send(Arc::new(record("last"))).unwrap();
        drop(tx);
        handle.await.unwrap();
        assert_eq!(sink.batch_messages(), vec![vec!["last"]]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_store_discards_batch_and_continues() {
        let sink = FailingSink::new(1);
        let (tx, counters, shutdown, handle) = spawn_worker(sink.clone(), 16, settings(2, BIG));

        for name in ["a", "b", "c", "d"] {
            tx.try_send(Arc::new(record(name))).unwrap();
        }
        shutdown.cancel();
        handle.await.unwrap();

        // First batch fails and is not retried; the second one lands.
        assert_eq!(sink.inner().batch_messages(), vec![vec!["c", "d"]]);
        let stats = counters.snapshot();
        assert_eq!(stats.batches_failed, 1);
        assert_eq!(stats.records_lost, 2);
        assert_eq!(stats.records_flushed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_grace_bounds_final_flush() {
        let sink = StallingSink::new();
        let (tx, counters, shutdown, handle) = spawn_worker(
            sink,
            16,
            WorkerSettings {
                batch_size: 10,
                batch_timeout: BIG,
                shutdown_grace: Duration::from_millis(100),
            },
        );

        tx.try_send(Arc::new(record("stuck"))).unwrap();
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(counters.snapshot().records_lost, 1);
        assert_eq!(counters.snapshot().records_flushed, 0);
    }

    #[test]
    fn sanitized_enforces_minimums() {
        let s = WorkerSettings {
            batch_size: 0,
            batch_timeout: Duration::ZERO,
            shutdown_grace: Duration::from_secs(1),
        }
        .sanitized();
        assert_eq!(s.batch_size, 1);
        assert_eq!(s.batch_timeout, Duration::from_millis(10));
    }
}
