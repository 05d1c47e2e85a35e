pub mod record;
pub mod sink;
pub mod router;
pub mod worker;
pub mod service;
pub mod stats;

pub mod backend;
pub mod console;
pub mod file;
pub mod noop_sink;

#[cfg(feature = "clickhouse")]
pub mod clickhouse;

pub mod config;
pub mod decode;
pub mod env;
pub mod init;
pub mod listener;
pub mod loadgen;
pub mod shutdown;
pub mod test_utils;

pub use record::LogRecord;
pub use router::Router;
pub use service::{IngestOutcome, LogIngester, LogService, ServiceError, ServiceSettings};
pub use sink::{LogSink, SinkError};
