use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::decode::decode_record;
use crate::service::LogIngester;

/// Largest possible UDP payload.
const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Counters kept by the listener for datagrams that never reach the core.
#[derive(Debug, Default)]
pub struct ListenerCounters {
    pub received: AtomicU64,
    pub malformed: AtomicU64,
    pub receive_errors: AtomicU64,
}

impl ListenerCounters {
    pub fn snapshot(&self) -> ListenerStats {
        ListenerStats {
            received: self.received.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ListenerStats {
    pub received: u64,
    pub malformed: u64,
    pub receive_errors: u64,
}

/// UDP adapter: receives datagrams, decodes them into records and hands
/// them to a [`LogIngester`].
///
/// Malformed payloads and records without `app`/`service` are logged and
/// dropped here; they never reach the routing core.
pub struct UdpListener {
    socket: UdpSocket,
    ingester: Arc<dyn LogIngester>,
    counters: Arc<ListenerCounters>,
}

impl UdpListener {
    pub async fn bind(address: &str, ingester: Arc<dyn LogIngester>) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(address).await?;
        Ok(Self {
            socket,
            ingester,
            counters: Arc::new(ListenerCounters::default()),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn counters(&self) -> Arc<ListenerCounters> {
        Arc::clone(&self.counters)
    }

    /// Receive until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

        match self.socket.local_addr() {
            Ok(addr) => tracing::info!(address = %addr, "udp listener started"),
            Err(_) => tracing::info!("udp listener started"),
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("shutting down udp listener");
                    return;
                }
                received = self.socket.recv_from(&mut buffer) => match received {
                    Ok((n, source)) => self.handle_datagram(&buffer[..n], source),
                    Err(e) => {
                        self.counters.receive_errors.fetch_add(1, Ordering::Relaxed);
                        tracing::error!(error = %e, "reading from udp socket");
                    }
                },
            }
        }
    }

    fn handle_datagram(&self, payload: &[u8], source: SocketAddr) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        match decode_record(payload) {
            Ok(record) => {
                self.ingester.ingest(record);
            }
            Err(e) => {
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    source = %source,
                    error = %e,
                    log_content = %String::from_utf8_lossy(payload),
                    "dropping undecodable log datagram"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::LogRecord;
    use crate::service::IngestOutcome;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Collecting(Mutex<Vec<LogRecord>>);

    impl LogIngester for Collecting {
        fn ingest(&self, record: LogRecord) -> IngestOutcome {
            self.0.lock().unwrap().push(record);
            IngestOutcome::Routed { admitted: 1, dropped: 0, unknown: 0 }
        }
    }

    #[tokio::test]
    async fn forwards_valid_and_drops_invalid_datagrams() {
        let collected = Arc::new(Collecting::default());
        let listener = UdpListener::bind("127.0.0.1:0", collected.clone()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let counters = listener.counters();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(listener.run(shutdown.clone()));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(br#"{"app":"a","service":"s","message":"one"}"#, addr).await.unwrap();
        client.send_to(br#"{"service":"s","message":"no app"}"#, addr).await.unwrap();
        client.send_to(b"garbage", addr).await.unwrap();
        client.send_to(br#"{"app":"a","service":"s","message":"two"}"#, addr).await.unwrap();

        for _ in 0..200 {
            if counters.received.load(Ordering::Relaxed) >= 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        shutdown.cancel();
        task.await.unwrap();

        let messages: Vec<String> = collected.0.lock().unwrap().iter().map(|r| r.message.clone()).collect();
        assert_eq!(messages, vec!["one", "two"]);
        assert_eq!(
            counters.snapshot(),
            ListenerStats {
                received: 4,
                malformed: 2,
                receive_errors: 0,
            }
        );
    }
}
