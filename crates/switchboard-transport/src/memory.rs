//! In-memory transport.
//!
//! Connections are a pair of unbounded queues, which makes broker behavior
//! observable in tests without sockets.

use async_trait::async_trait;
use http::HeaderMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use switchboard_protocol::HandshakeRequest;
use tokio::sync::{mpsc, Mutex};

use crate::traits::{Connection, Transport, TransportError};

/// A frame sent by the server side of an in-memory connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    /// A text frame.
    Text(String),
    /// The server closed the connection.
    Close {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Transport whose connections are created in-process.
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<Box<dyn Connection>>,
    rx: Mutex<mpsc::UnboundedReceiver<Box<dyn Connection>>>,
}

impl MemoryTransport {
    /// Create an empty transport.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Open a connection to `uri`; the server side is queued for `accept()`.
    pub fn connect(&self, uri: &str) -> MemoryClient {
        self.connect_with_headers(uri, HeaderMap::new())
    }

    /// Open a connection carrying request headers.
    pub fn connect_with_headers(&self, uri: &str, headers: HeaderMap) -> MemoryClient {
        let (conn, client) = pair(HandshakeRequest::new(uri).with_headers(headers));
        // The receiver lives as long as `self`
        let _ = self.tx.send(Box::new(conn));
        client
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn accept(&self) -> Result<Box<dyn Connection>, TransportError> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::Shutdown)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Create a connected pair without going through a transport.
#[must_use]
pub fn pair(request: HandshakeRequest) -> (MemoryConnection, MemoryClient) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let open = Arc::new(AtomicBool::new(true));

    let conn = MemoryConnection {
        request,
        inbound: inbound_rx,
        outbound: outbound_tx,
        open: Arc::clone(&open),
    };
    let client = MemoryClient {
        inbound: Some(inbound_tx),
        outbound: outbound_rx,
        open,
    };
    (conn, client)
}

/// Server side of an in-memory connection.
pub struct MemoryConnection {
    request: HandshakeRequest,
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<ServerFrame>,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl Connection for MemoryConnection {
    fn request(&self) -> &HandshakeRequest {
        &self.request
    }

    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        match self.inbound.recv().await {
            Some(text) => Ok(Some(text)),
            None => {
                self.open.store(false, Ordering::SeqCst);
                Ok(None)
            }
        }
    }

    async fn send(&mut self, text: &str) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ConnectionClosed);
        }
        self.outbound
            .send(ServerFrame::Text(text.to_owned()))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self.outbound.send(ServerFrame::Close {
            code,
            reason: reason.to_owned(),
        });
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Client side of an in-memory connection.
pub struct MemoryClient {
    inbound: Option<mpsc::UnboundedSender<String>>,
    outbound: mpsc::UnboundedReceiver<ServerFrame>,
    open: Arc<AtomicBool>,
}

impl MemoryClient {
    /// Send a text frame. Returns `false` if the connection is gone.
    pub fn send(&self, text: impl Into<String>) -> bool {
        self.inbound
            .as_ref()
            .is_some_and(|tx| tx.send(text.into()).is_ok())
    }

    /// Wait for the next frame from the server.
    ///
    /// Returns `None` once the server side has been dropped.
    pub async fn recv(&mut self) -> Option<ServerFrame> {
        self.outbound.recv().await
    }

    /// Take a frame if one is already queued.
    pub fn try_recv(&mut self) -> Option<ServerFrame> {
        self.outbound.try_recv().ok()
    }

    /// Drop the client end, which the server observes as a clean close.
    pub fn disconnect(&mut self) {
        self.inbound = None;
        self.open.store(false, Ordering::SeqCst);
    }

    /// Whether neither side has closed the connection.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
