//! The routing-and-batching core.
//!
//! [`LogService`] owns one bounded buffer and one [`DestinationWorker`] per
//! enabled destination. Ingestion routes each record and performs a
//! non-blocking enqueue per destination; a full buffer drops the record
//! instead of stalling the caller.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::Performance;
use crate::record::LogRecord;
use crate::router::Router;
use crate::sink::LogSink;
use crate::stats::{DestinationCounters, IngestCounters, ServiceStats};
use crate::worker::{DestinationWorker, WorkerSettings};

/// Extra time granted on top of the shutdown grace before a worker that is
/// stuck in a regular flush gets aborted.
const SHUTDOWN_JOIN_MARGIN: Duration = Duration::from_secs(1);

/// Entry point used by inbound adapters.
pub trait LogIngester: Send + Sync {
    /// Hand one decoded record to the gateway. Must never block.
    fn ingest(&self, record: LogRecord) -> IngestOutcome;
}

/// What happened to one ingested record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Routed {
        /// Destinations whose buffer accepted the record.
        admitted: usize,
        /// Destinations whose buffer was full or closed.
        dropped: usize,
        /// Routed names without a configured, enabled destination.
        unknown: usize,
    },
    /// No rule matched and the default destination list is empty.
    Unrouted,
    /// The service is not running (not started yet, or shutting down).
    Rejected,
}

#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error("no enabled destinations configured")]
    NoDestinations,

    #[error("log service already started")]
    AlreadyStarted,
}

/// Buffer and batching settings applied to every destination.
#[derive(Debug, Clone, Copy)]
pub struct ServiceSettings {
    pub buffer_size: usize,
    pub worker: WorkerSettings,
}

impl From<&Performance> for ServiceSettings {
    fn from(perf: &Performance) -> Self {
        ServiceSettings {
            buffer_size: perf.buffer_size,
            worker: WorkerSettings {
                batch_size: perf.batch_size,
                batch_timeout: perf.batch_timeout(),
                shutdown_grace: perf.shutdown_grace(),
            },
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        ServiceSettings::from(&Performance::default())
    }
}

struct Destination {
    buffer: mpsc::Sender<Arc<LogRecord>>,
    counters: Arc<DestinationCounters>,
}

struct WorkerHandle {
    name: String,
    handle: JoinHandle<()>,
    counters: Arc<DestinationCounters>,
}

pub struct LogService {
    sinks: HashMap<String, Arc<dyn LogSink>>,
    router: Router,
    settings: ServiceSettings,
    shutdown: CancellationToken,
    /// Populated once by `start`, read-only afterwards.
    destinations: HashMap<String, Destination>,
    workers: Mutex<Vec<WorkerHandle>>,
    counters: IngestCounters,
    started: bool,
}

impl LogService {
    /// Create a service over already-built sinks.
    ///
    /// **Parameters**
    /// - `sinks`: destination name -> storage backend, enabled ones only.
    /// - `router`: rules deciding which destinations receive a record.
    /// - `settings`: buffer capacity and batching knobs.
    /// - `shutdown`: lifecycle token; cancelling it makes every worker drain
    ///   and stop, and makes `ingest` reject new records.
    pub fn new(
        sinks: HashMap<String, Arc<dyn LogSink>>,
        router: Router,
        settings: ServiceSettings,
        shutdown: CancellationToken,
    ) -> Self {
        LogService {
            sinks,
            router,
            settings,
            shutdown,
            destinations: HashMap::new(),
            workers: Mutex::new(Vec::new()),
            counters: IngestCounters::default(),
            started: false,
        }
    }

    /// Create the buffer and spawn the worker of every destination.
    ///
    /// Must be called from within a Tokio runtime, exactly once.
    pub fn start(&mut self) -> Result<(), ServiceError> {
        if self.started {
            return Err(ServiceError::AlreadyStarted);
        }
        if self.sinks.is_empty() {
            return Err(ServiceError::NoDestinations);
        }

        let capacity = self.settings.buffer_size.max(1);
        let mut workers = Vec::with_capacity(self.sinks.len());

        for (name, sink) in &self.sinks {
            let (tx, rx) = mpsc::channel::<Arc<LogRecord>>(capacity);
            let counters = Arc::new(DestinationCounters::default());
            let worker = DestinationWorker::new(
                name.clone(),
                Arc::clone(sink),
                rx,
                self.settings.worker,
                Arc::clone(&counters),
                self.shutdown.clone(),
            );

            workers.push(WorkerHandle {
                name: name.clone(),
                handle: tokio::spawn(worker.run()),
                counters: Arc::clone(&counters),
            });
            self.destinations.insert(name.clone(), Destination { buffer: tx, counters });
        }

        for name in self.router.referenced_destinations() {
            if !self.destinations.contains_key(name) {
                tracing::warn!(destination = %name, "routing references a destination that is not configured or not enabled");
            }
        }

        *self.workers.lock().unwrap_or_else(|e| e.into_inner()) = workers;
        self.started = true;

        tracing::info!(
            destinations = self.destinations.len(),
            rules = self.router.rule_count(),
            buffer_size = capacity,
            batch_size = self.settings.worker.batch_size,
            "log service started"
        );
        Ok(())
    }

    /// Route a record and enqueue it on every selected destination.
    ///
    /// Never waits: a full buffer drops the record for that destination.
    pub fn ingest(&self, record: LogRecord) -> IngestOutcome {
        if !self.started || self.shutdown.is_cancelled() {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(service = %record.service, "log service not running, rejecting record");
            return IngestOutcome::Rejected;
        }
        self.counters.ingested.fetch_add(1, Ordering::Relaxed);

        let names = self.router.route(&record);
        if names.is_empty() {
            self.counters.unrouted.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(service = %record.service, level = %record.level, "no destination for record");
            return IngestOutcome::Unrouted;
        }

        let record = Arc::new(record);
        let (mut admitted, mut dropped, mut unknown) = (0, 0, 0);

        for name in names {
            let Some(destination) = self.destinations.get(name) else {
                unknown += 1;
                self.counters.unknown_destination.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(destination = %name, "destination not found, skipping");
                continue;
            };

            match destination.buffer.try_send(Arc::clone(&record)) {
                Ok(()) => {
                    admitted += 1;
                    destination.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Full(_)) => {
                    dropped += 1;
                    destination.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(destination = %name, "buffer full, dropping log record");
                }
                Err(TrySendError::Closed(_)) => {
                    dropped += 1;
                    destination.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(destination = %name, "buffer closed, dropping log record");
                }
            }
        }

        IngestOutcome::Routed { admitted, dropped, unknown }
    }

    /// Signal shutdown, wait for every worker to drain and flush, then
    /// close every sink.
    ///
    /// Each worker bounds its final flush by the configured grace period; a
    /// worker still busy past that (plus a small margin) is aborted. Safe
    /// to call more than once; later calls only return the stats.
    pub async fn shutdown(&self) -> ServiceStats {
        self.shutdown.cancel();

        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));
        if workers.is_empty() {
            return self.stats();
        }

        let deadline = Instant::now() + self.settings.worker.shutdown_grace + SHUTDOWN_JOIN_MARGIN;
        for WorkerHandle { name, mut handle, counters } in workers {
            match timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(destination = %name, error = %e, "destination worker failed");
                }
                Err(_) => {
                    handle.abort();
                    // Wait for the abort to land so the counters are final.
                    let _ = handle.await;
                    let abandoned = counters.unsettled();
                    counters.records_lost.fetch_add(abandoned, Ordering::Relaxed);
                    tracing::error!(destination = %name, abandoned, "destination worker did not stop in time, aborted");
                }
            }
        }

        for (name, sink) in &self.sinks {
            if let Err(e) = sink.close().await {
                tracing::error!(destination = %name, error = %e, "failed to close storage");
            }
        }

        let stats = self.stats();
        tracing::info!(ingested = stats.ingested, "log service stopped");
        stats
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            ingested: self.counters.ingested.load(Ordering::Relaxed),
            unrouted: self.counters.unrouted.load(Ordering::Relaxed),
            unknown_destination: self.counters.unknown_destination.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            destinations: self
                .destinations
                .iter()
                .map(|(name, d)| (name.clone(), d.counters.snapshot()))
                .collect(),
        }
    }

    /// Clone of the lifecycle token, for tasks that must stop together with
    /// the service (e.g. the UDP listener).
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn destination_names(&self) -> impl Iterator<Item = &str> {
        self.sinks.keys().map(String::as_str)
    }
}

impl LogIngester for LogService {
    fn ingest(&self, record: LogRecord) -> IngestOutcome {
        LogService::ingest(self, record)
    }
}
