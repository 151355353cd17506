//! Transport abstraction traits for Switchboard.
//!
//! These traits define the interface that all transport implementations must provide,
//! allowing the broker to be transport-agnostic.

use async_trait::async_trait;
use switchboard_protocol::HandshakeRequest;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The transport stopped accepting connections.
    #[error("Transport shut down")]
    Shutdown,

    /// The upgrade handshake failed.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Inbound frame exceeds the configured limit.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge {
        /// Size of the offending frame.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A transport that can accept connections.
///
/// Transports are responsible for handling the underlying protocol
/// and completing the upgrade handshake before handing over a [`Connection`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Accept a new connection.
    ///
    /// Blocks until a new connection is available or an error occurs.
    async fn accept(&self) -> Result<Box<dyn Connection>, TransportError>;

    /// Get the transport name (e.g., "websocket", "axum").
    fn name(&self) -> &'static str;

    /// Check if the transport is healthy.
    fn is_healthy(&self) -> bool {
        true
    }
}

/// An active connection over a transport.
///
/// Connections carry JSON text frames between the broker and a single client.
#[async_trait]
pub trait Connection: Send {
    /// The upgrade request this connection was opened with.
    fn request(&self) -> &HandshakeRequest;

    /// Receive the next text frame.
    ///
    /// Returns `None` if the connection is closed. Must be cancel-safe: the
    /// broker races it against outbound traffic.
    async fn recv(&mut self) -> Result<Option<String>, TransportError>;

    /// Send a text frame.
    async fn send(&mut self, text: &str) -> Result<(), TransportError>;

    /// Close the connection with a code and reason.
    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError>;

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<&str> {
        self.request().remote_addr.as_deref()
    }
}
