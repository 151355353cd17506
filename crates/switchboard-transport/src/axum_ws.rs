//! axum WebSocket upgrade transport.
//!
//! Serves WebSocket upgrades from an [`axum::Router`] so the broker can share
//! a port with ordinary HTTP routes. Upgraded sockets are queued until the
//! broker accepts them.

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::{HeaderMap, Uri},
    response::Response,
    Router,
};
use std::net::SocketAddr;
use switchboard_protocol::HandshakeRequest;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::traits::{Connection, Transport, TransportError};

/// Upgraded sockets waiting for the broker.
const DEFAULT_BACKLOG: usize = 1024;

#[derive(Clone)]
struct UpgradeState {
    tx: mpsc::Sender<Box<dyn Connection>>,
    max_message_size: usize,
}

/// Transport fed by an axum fallback handler.
pub struct AxumTransport {
    rx: Mutex<mpsc::Receiver<Box<dyn Connection>>>,
    state: UpgradeState,
}

impl AxumTransport {
    /// Create a transport that rejects frames larger than `max_message_size`.
    #[must_use]
    pub fn new(max_message_size: usize) -> Self {
        let (tx, rx) = mpsc::channel(DEFAULT_BACKLOG);
        Self {
            rx: Mutex::new(rx),
            state: UpgradeState {
                tx,
                max_message_size,
            },
        }
    }

    /// A router that upgrades every unmatched request.
    ///
    /// Merge it into the application router; other routes keep priority.
    /// Serve with `into_make_service_with_connect_info::<SocketAddr>()` to
    /// expose peer addresses.
    pub fn router(&self) -> Router {
        Router::new()
            .fallback(upgrade_handler)
            .with_state(self.state.clone())
    }
}

#[async_trait]
impl Transport for AxumTransport {
    async fn accept(&self) -> Result<Box<dyn Connection>, TransportError> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::Shutdown)
    }

    fn name(&self) -> &'static str {
        "axum"
    }
}

async fn upgrade_handler(
    State(state): State<UpgradeState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    uri: Uri,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let target = uri
        .path_and_query()
        .map_or_else(|| uri.path().to_string(), |pq| pq.as_str().to_string());

    let mut request = HandshakeRequest::new(target).with_headers(headers);
    if let Some(ConnectInfo(addr)) = connect_info {
        request = request.with_remote_addr(addr.to_string());
    }

    let UpgradeState {
        tx,
        max_message_size,
    } = state;

    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| async move {
            debug!(uri = %request.uri, "WebSocket upgraded");
            let conn = AxumConnection {
                socket,
                request,
                is_open: true,
            };
            if tx.send(Box::new(conn)).await.is_err() {
                warn!("Transport dropped, discarding upgraded socket");
            }
        })
}

/// A socket upgraded through axum.
pub struct AxumConnection {
    socket: WebSocket,
    request: HandshakeRequest,
    is_open: bool,
}

#[async_trait]
impl Connection for AxumConnection {
    fn request(&self) -> &HandshakeRequest {
        &self.request
    }

    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.socket.recv().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(String::from_utf8_lossy(&data).into_owned()));
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Received close frame");
                    self.is_open = false;
                    return Ok(None);
                }
                Some(Err(e)) => {
                    self.is_open = false;
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    self.is_open = false;
                    return Ok(None);
                }
            }
        }
    }

    async fn send(&mut self, text: &str) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }

        self.socket
            .send(Message::Text(text.to_owned()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        if !std::mem::replace(&mut self.is_open, false) {
            return Ok(());
        }

        let frame = CloseFrame {
            code,
            reason: reason.to_owned().into(),
        };
        self.socket
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| TransportError::SendFailed(format!("Failed to close: {}", e)))
    }

    fn is_open(&self) -> bool {
        self.is_open
    }
}
