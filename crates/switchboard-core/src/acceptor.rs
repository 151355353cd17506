//! Per-connection handshake and message pump.
//!
//! ```text
//! Connecting ──▶ AuthPending ──▶ Subscribed ──▶ Closed
//!      │              │                            ▲
//!      └──────────────┴──── rejected (1008) ───────┘
//! ```

use crate::auth::{AuthGuard, Identity};
use crate::connections::ConnectionManager;
use crate::message::{ClientId, ClientInfo, ClientSocket, MessageHandler};
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::registry::ChannelRegistry;
use serde_json::Value;
use std::sync::Arc;
use switchboard_protocol::{decode, encode, path, CloseReason, HandshakeRequest};
use switchboard_transport::Connection;
use tracing::{debug, info, trace, warn};

/// Where a connection is in its lifecycle. Only surfaced in trace logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    /// Resolving the path and channel.
    Connecting,
    /// Waiting on the auth guard.
    AuthPending,
    /// Receiving broadcasts and forwarding inbound messages.
    Subscribed,
    /// Terminal.
    Closed,
}

/// Drives one inbound connection from handshake to close.
pub struct ConnectionAcceptor<'a, U> {
    registry: &'a ChannelRegistry<U>,
    connections: &'a ConnectionManager<U>,
    guard: Option<&'a dyn AuthGuard<U>>,
    prefix: &'a str,
    state: ConnectionState,
}

impl<'a, U: Identity> ConnectionAcceptor<'a, U> {
    #[must_use]
    pub fn new(
        registry: &'a ChannelRegistry<U>,
        connections: &'a ConnectionManager<U>,
        guard: Option<&'a dyn AuthGuard<U>>,
        prefix: &'a str,
    ) -> Self {
        Self {
            registry,
            connections,
            guard,
            prefix,
            state: ConnectionState::Connecting,
        }
    }

    /// Run the connection until either side closes it.
    ///
    /// Returns the reason the broker closed the connection, or `None` if the
    /// peer went away first.
    pub async fn run(mut self, mut conn: Box<dyn Connection>) -> Option<CloseReason> {
        let _metrics = ConnectionMetricsGuard::new();

        // Owned copy: the connection is not `Sync`, so no borrow of it may
        // live across the auth await.
        let request = conn.request().clone();

        let (channel, user) = match self.handshake(&request).await {
            Ok(resolved) => resolved,
            Err(reason) => return Some(self.reject(conn.as_mut(), reason).await),
        };

        let (socket, mut outbound) = ClientSocket::channel();
        let Some(id) = self.join(&channel, user.clone(), socket) else {
            return Some(self.reject(conn.as_mut(), CloseReason::MissingChannel).await);
        };

        self.transition(ConnectionState::Subscribed);
        info!(
            client = %id,
            channel = %channel,
            remote = ?request.remote_addr,
            "Client connected"
        );

        let client = ClientInfo {
            id: id.clone(),
            user,
        };
        let mut closed_by = None;

        loop {
            tokio::select! {
                frame = outbound.recv() => {
                    let Some(frame) = frame else { break };
                    if let Err(e) = conn.send(&frame).await {
                        debug!(client = %id, error = %e, "Send failed");
                        break;
                    }
                }
                inbound = conn.recv() => match inbound {
                    Ok(Some(text)) => match decode(&text) {
                        Ok(value) => {
                            metrics::record_inbound();
                            // Looked up per frame: the channel may have been
                            // closed or reopened since this client joined.
                            let handler = self.registry.handler(&channel);
                            dispatch(handler.as_ref(), &client, value);
                        }
                        Err(e) => {
                            debug!(client = %id, error = %e, "Invalid inbound frame");
                            closed_by = Some(self.reject(conn.as_mut(), CloseReason::InvalidJson).await);
                            break;
                        }
                    },
                    Ok(None) => break,
                    Err(e) => {
                        debug!(client = %id, error = %e, "Receive failed");
                        break;
                    }
                }
            }
        }

        self.transition(ConnectionState::Closed);
        self.connections.remove_client(&id);
        info!(client = %id, channel = %channel, "Client disconnected");
        closed_by
    }

    /// Resolve the channel and, if it requires auth, the user.
    async fn handshake(
        &mut self,
        request: &HandshakeRequest,
    ) -> Result<(String, Option<U>), CloseReason> {
        let channel = path::channel_id(request.path(), self.prefix)?;
        let config = self
            .registry
            .config(channel)
            .ok_or(CloseReason::MissingChannel)?;

        if !config.auth_required {
            return Ok((config.id.clone(), None));
        }

        self.transition(ConnectionState::AuthPending);
        let guard = self.guard.ok_or(CloseReason::AuthNotConfigured)?;
        match guard.authorize(request).await {
            Ok(Some(user)) => Ok((config.id.clone(), Some(user))),
            Ok(None) => {
                debug!(channel = %config.id, "Auth guard returned no user");
                Err(CloseReason::AuthFailed)
            }
            Err(e) => {
                debug!(channel = %config.id, error = %e, "Auth guard rejected connection");
                Err(CloseReason::AuthFailed)
            }
        }
    }

    /// Subscribe to `channel` and queue the latest-message replay.
    ///
    /// The registry entry is held shared throughout, so no broadcast can land
    /// between the replay and the subscription. Returns `None` if the channel
    /// was closed in the meantime.
    fn join(&self, channel: &str, user: Option<U>, socket: ClientSocket) -> Option<ClientId> {
        let entry = self.registry.entry(channel)?;
        let id = self.connections.add_client(channel, user, socket.clone());

        if let Some(latest) = entry.latest.as_ref().filter(|v| !v.is_null()) {
            match encode(latest) {
                Ok(frame) => {
                    socket.send(Arc::from(frame));
                }
                Err(e) => warn!(channel = %channel, error = %e, "Could not encode latest message"),
            }
        }

        Some(id)
    }

    async fn reject(&mut self, conn: &mut dyn Connection, reason: CloseReason) -> CloseReason {
        debug!(
            path = %conn.request().path(),
            remote = ?conn.remote_addr(),
            reason = %reason,
            "Rejecting connection"
        );
        metrics::record_rejection(reason.as_str());
        if let Err(e) = conn.close(reason.code(), reason.as_str()).await {
            trace!(error = %e, "Close after rejection failed");
        }
        self.transition(ConnectionState::Closed);
        reason
    }

    fn transition(&mut self, next: ConnectionState) {
        trace!(from = ?self.state, to = ?next, "Connection state");
        self.state = next;
    }
}

/// Invoke the channel handler. No table locks are held here.
fn dispatch<U>(handler: Option<&MessageHandler<U>>, client: &ClientInfo<U>, value: Value) {
    match handler {
        Some(handler) => handler(client, value),
        None => trace!(client = %client.id, "No handler for inbound message"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthError, FnGuard};
    use crate::channel::ChannelDefinition;
    use serde_json::json;
    use switchboard_transport::memory::pair;
    use switchboard_transport::ServerFrame;

    fn closed(reason: CloseReason) -> ServerFrame {
        ServerFrame::Close {
            code: 1008,
            reason: reason.as_str().to_string(),
        }
    }

    #[tokio::test]
    async fn test_reject_invalid_path() {
        let registry = ChannelRegistry::<()>::new();
        let connections = ConnectionManager::new();
        let (conn, mut client) = pair(HandshakeRequest::new("/other/chat"));

        let acceptor = ConnectionAcceptor::new(&registry, &connections, None, "ServerChannel");
        let reason = acceptor.run(Box::new(conn)).await;

        assert_eq!(reason, Some(CloseReason::InvalidPath));
        assert_eq!(client.recv().await, Some(closed(CloseReason::InvalidPath)));
    }

    #[tokio::test]
    async fn test_auth_guard_user_reaches_handler() {
        let registry = ChannelRegistry::<String>::new();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        registry
            .open(
                ChannelDefinition::with_id("secure").auth_required(true),
                false,
                Some(crate::message::handler(move |client: &ClientInfo<String>, value| {
                    sink.lock().unwrap().push((client.user.clone(), value));
                })),
            )
            .unwrap();
        let connections = ConnectionManager::new();
        let guard = FnGuard::new(|req: &HandshakeRequest| match req.bearer_token() {
            Some(token) => Ok(Some(format!("user-{token}"))),
            None => Err(AuthError::MissingCredentials),
        });

        let (conn, mut client) = pair(HandshakeRequest::new("/ServerChannel/secure?token=7"));
        let acceptor =
            ConnectionAcceptor::new(&registry, &connections, Some(&guard), "ServerChannel");

        assert!(client.send(r#"{"n":1}"#));
        client.disconnect();
        assert_eq!(acceptor.run(Box::new(conn)).await, None);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(Some("user-7".to_string()), json!({"n": 1}))]
        );
        assert_eq!(connections.client_count(), 0);
    }

    #[tokio::test]
    async fn test_guard_without_user_fails() {
        let registry = ChannelRegistry::<String>::new();
        registry
            .open(ChannelDefinition::with_id("secure").auth_required(true), false, None)
            .unwrap();
        let connections = ConnectionManager::new();
        let guard = FnGuard::new(
            |_: &HandshakeRequest| -> Result<Option<String>, AuthError> { Ok(None) },
        );

        let (conn, mut client) = pair(HandshakeRequest::new("/ServerChannel/secure"));
        let acceptor =
            ConnectionAcceptor::new(&registry, &connections, Some(&guard), "ServerChannel");

        assert_eq!(acceptor.run(Box::new(conn)).await, Some(CloseReason::AuthFailed));
        assert_eq!(client.recv().await, Some(closed(CloseReason::AuthFailed)));
    }

    #[tokio::test]
    async fn test_auth_channel_enters_auth_pending() {
        let registry = ChannelRegistry::<String>::new();
        registry
            .open(ChannelDefinition::with_id("secure").auth_required(true), false, None)
            .unwrap();
        let connections = ConnectionManager::new();
        let request = HandshakeRequest::new("/ServerChannel/secure");

        let mut acceptor = ConnectionAcceptor::new(&registry, &connections, None, "ServerChannel");
        assert_eq!(acceptor.state, ConnectionState::Connecting);
        assert_eq!(
            acceptor.handshake(&request).await,
            Err(CloseReason::AuthNotConfigured)
        );
        assert_eq!(acceptor.state, ConnectionState::AuthPending);
    }

    #[tokio::test]
    async fn test_open_channel_skips_auth_pending() {
        let registry = ChannelRegistry::<String>::new();
        registry
            .open(ChannelDefinition::with_id("chat"), false, None)
            .unwrap();
        let connections = ConnectionManager::new();
        let request = HandshakeRequest::new("/ServerChannel/chat");

        let mut acceptor = ConnectionAcceptor::new(&registry, &connections, None, "ServerChannel");
        assert_eq!(
            acceptor.handshake(&request).await,
            Ok(("chat".to_string(), None))
        );
        assert_eq!(acceptor.state, ConnectionState::Connecting);
    }
}
