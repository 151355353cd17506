//! WebSocket transport implementation.
//!
//! This module provides a standalone WebSocket listener using tokio-tungstenite.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use switchboard_protocol::HandshakeRequest;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        protocol::{frame::coding::CloseCode, CloseFrame},
        Error as WsError, Message,
    },
    WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::traits::{Connection, Transport, TransportError};

/// Completed handshakes waiting for the broker.
const DEFAULT_BACKLOG: usize = 1024;

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum message size in bytes.
    pub max_message_size: usize,
    /// How long a peer may take to complete the upgrade.
    pub handshake_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_message_size: 64 * 1024, // 64 KB
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// WebSocket transport.
///
/// TCP connections are accepted on a background task and each upgrade runs
/// on its own task, so a stalled peer never holds up [`Transport::accept`].
pub struct WebSocketTransport {
    rx: Mutex<mpsc::Receiver<Box<dyn Connection>>>,
    local_addr: SocketAddr,
    acceptor: JoinHandle<()>,
}

impl WebSocketTransport {
    /// Create a new WebSocket transport.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn new(config: WebSocketConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        info!("WebSocket transport listening on {}", local_addr);

        let (tx, rx) = mpsc::channel(DEFAULT_BACKLOG);
        let acceptor = tokio::spawn(accept_loop(listener, tx, config));

        Ok(Self {
            rx: Mutex::new(rx),
            local_addr,
            acceptor,
        })
    }

    /// Create a new WebSocket transport with default limits.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        Self::new(WebSocketConfig {
            bind_addr: addr,
            ..Default::default()
        })
        .await
    }

    /// Get the local address this transport is bound to.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.local_addr)
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn accept(&self) -> Result<Box<dyn Connection>, TransportError> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::Shutdown)
    }

    fn name(&self) -> &'static str {
        "websocket"
    }

    fn is_healthy(&self) -> bool {
        !self.acceptor.is_finished()
    }
}

async fn accept_loop(
    listener: TcpListener,
    tx: mpsc::Sender<Box<dyn Connection>>,
    config: WebSocketConfig,
) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Failed to accept TCP connection: {}", e);
                continue;
            }
        };
        if tx.is_closed() {
            break;
        }

        debug!("Accepted TCP connection from {}", addr);

        let tx = tx.clone();
        let timeout = config.handshake_timeout;
        let max_message_size = config.max_message_size;
        tokio::spawn(async move {
            let handshake = upgrade(stream, addr, max_message_size);
            let conn = match tokio::time::timeout(timeout, handshake).await {
                Ok(Ok(conn)) => conn,
                Ok(Err(_)) => return,
                Err(_) => {
                    warn!("WebSocket handshake with {} timed out", addr);
                    return;
                }
            };
            if tx.send(Box::new(conn)).await.is_err() {
                debug!("Transport dropped, discarding connection from {}", addr);
            }
        });
    }
}

/// A WebSocket connection.
pub struct WebSocketConnection {
    stream: WebSocketStream<TcpStream>,
    request: HandshakeRequest,
    is_open: bool,
    max_message_size: usize,
}

impl WebSocketConnection {
    fn check_size(&self, len: usize) -> Result<(), TransportError> {
        if len > self.max_message_size {
            warn!(
                "Message too large: {} bytes (max: {})",
                len, self.max_message_size
            );
            return Err(TransportError::FrameTooLarge {
                size: len,
                max: self.max_message_size,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    fn request(&self) -> &HandshakeRequest {
        &self.request
    }

    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    self.check_size(text.len())?;
                    return Ok(Some(text));
                }
                Some(Ok(Message::Binary(data))) => {
                    // Binary frames are accepted as UTF-8 text
                    self.check_size(data.len())?;
                    return Ok(Some(String::from_utf8_lossy(&data).into_owned()));
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                    // tungstenite queues pong replies itself
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Received close frame");
                    self.is_open = false;
                    return Ok(None);
                }
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    debug!("WebSocket stream ended");
                    self.is_open = false;
                    return Ok(None);
                }
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    self.is_open = false;
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
            }
        }
    }

    async fn send(&mut self, text: &str) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }

        self.stream
            .send(Message::Text(text.to_owned()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        if !std::mem::replace(&mut self.is_open, false) {
            return Ok(()); // Already closed
        }

        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        };
        match self.stream.close(Some(frame)).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::SendFailed(format!("Failed to close: {}", e))),
        }
    }

    fn is_open(&self) -> bool {
        self.is_open
    }
}

/// Upgrade an accepted TCP stream to a WebSocket connection, capturing the
/// request path and headers for the broker.
///
/// # Errors
///
/// Returns an error if the WebSocket handshake fails.
pub async fn upgrade(
    stream: TcpStream,
    remote_addr: SocketAddr,
    max_message_size: usize,
) -> Result<WebSocketConnection, TransportError> {
    let mut request = HandshakeRequest::default().with_remote_addr(remote_addr.to_string());

    let capture = |req: &Request, resp: Response| {
        request.uri = req.uri().to_string();
        request.headers = req.headers().clone();
        Ok::<_, ErrorResponse>(resp)
    };

    let stream = accept_hdr_async(stream, capture).await.map_err(|e| {
        error!("WebSocket handshake failed: {}", e);
        TransportError::Handshake(e.to_string())
    })?;

    debug!(uri = %request.uri, "WebSocket handshake completed with {}", remote_addr);

    Ok(WebSocketConnection {
        stream,
        request,
        is_open: true,
        max_message_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_config_default() {
        let config = WebSocketConfig::default();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.max_message_size, 64 * 1024);
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_upgrade_captures_request() {
        let transport = WebSocketTransport::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let addr = transport.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let url = format!("ws://{}/ServerChannel/chat?token=abc", addr);
            let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
            ws.send(Message::Text(r#"{"msg":"hi"}"#.into())).await.unwrap();
            // Wait for the server to close us
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    break;
                }
            }
        });

        let mut conn = transport.accept().await.unwrap();
        assert_eq!(conn.request().path(), "/ServerChannel/chat");
        assert_eq!(conn.request().query_param("token").as_deref(), Some("abc"));
        assert!(conn.remote_addr().is_some());

        let text = conn.recv().await.unwrap().unwrap();
        assert_eq!(text, r#"{"msg":"hi"}"#);

        conn.close(1000, "bye").await.unwrap();
        assert!(!conn.is_open());
        client.await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_peer_does_not_block_accept() {
        let transport = WebSocketTransport::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let addr = transport.local_addr().unwrap();

        // Opens TCP but never sends the upgrade request
        let _idle = TcpStream::connect(addr).await.unwrap();

        let client = tokio::spawn(async move {
            let url = format!("ws://{}/ServerChannel/chat", addr);
            tokio_tungstenite::connect_async(url).await.unwrap()
        });

        let conn = tokio::time::timeout(Duration::from_secs(3), transport.accept())
            .await
            .expect("accept blocked behind idle peer")
            .unwrap();
        assert_eq!(conn.request().path(), "/ServerChannel/chat");
        client.await.unwrap();
    }

    #[tokio::test]
    async fn test_stalled_handshake_is_dropped() {
        let transport = WebSocketTransport::new(WebSocketConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            handshake_timeout: Duration::from_millis(100),
            ..Default::default()
        })
        .await
        .unwrap();
        let addr = transport.local_addr().unwrap();

        let mut idle = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(
            Duration::from_secs(3),
            tokio::io::AsyncReadExt::read(&mut idle, &mut buf),
        )
        .await
        .expect("stalled peer was never dropped");
        assert!(matches!(read, Ok(0) | Err(_)));
        assert!(transport.is_healthy());
    }
}
