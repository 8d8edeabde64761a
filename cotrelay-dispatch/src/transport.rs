use std::net::SocketAddr;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cotrelay_core::Event;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Outbound channel to one TAK destination. The dispatcher borrows an
/// event for the duration of a send; the transport keeps no reference.
#[async_trait]
pub trait TakTransport: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn send(&self, event: &Event) -> Result<(), Self::Error>;
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Newline-delimited TCP transport. Connects lazily, and drops the
/// connection on a failed write so the next send reconnects.
pub struct TcpTakTransport {
    addr: SocketAddr,
    stream: Mutex<Option<TcpStream>>,
}

impl TcpTakTransport {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            stream: Mutex::new(None),
        }
    }

    async fn write_body(&self, body: &str) -> Result<(), TransportError> {
        let mut guard = self.stream.lock().await;

        let mut stream = match guard.take() {
            Some(stream) => stream,
            None => {
                let stream = TcpStream::connect(self.addr).await?;
                info!(addr = %self.addr, "connected to destination");
                stream
            }
        };

        let result = async {
            stream.write_all(body.as_bytes()).await?;
            stream.write_all(b"\n").await?;
            stream.flush().await
        }
        .await;

        match result {
            Ok(()) => {
                *guard = Some(stream);
                Ok(())
            }
            // The connection is dropped on failure; the next send
            // reconnects.
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl TakTransport for TcpTakTransport {
    type Error = TransportError;

    async fn send(&self, event: &Event) -> Result<(), Self::Error> {
        self.write_body(&event.body).await?;
        debug!(device_id = %event.device_id, "event written to destination");
        Ok(())
    }
}

#[derive(Debug, Error)]
#[error("injected transport failure")]
pub struct InjectedFailure;

/// Test transport that records sent events and can fail on demand.
#[derive(Clone, Default)]
pub struct MockTakTransport {
    sent: Arc<StdMutex<Vec<Event>>>,
    failures_remaining: Arc<AtomicUsize>,
}

impl MockTakTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` sends fail.
    pub fn fail_next(&self, n: usize) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Event> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TakTransport for MockTakTransport {
    type Error = InjectedFailure;

    async fn send(&self, event: &Event) -> Result<(), Self::Error> {
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0
            && self
                .failures_remaining
                .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            return Err(InjectedFailure);
        }

        if let Ok(mut sent) = self.sent.lock() {
            sent.push(event.clone());
        }
        Ok(())
    }
}
