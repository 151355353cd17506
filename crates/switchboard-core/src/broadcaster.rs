//! Broadcast fan-out.

use crate::connections::ConnectionManager;
use crate::error::BrokerError;
use crate::metrics;
use crate::registry::ChannelRegistry;
use serde_json::Value;
use std::sync::Arc;
use switchboard_protocol::encode;
use tracing::{debug, trace};

/// Delivers messages to every subscriber of a channel.
pub struct Broadcaster<'a, U> {
    registry: &'a ChannelRegistry<U>,
    connections: &'a ConnectionManager<U>,
}

impl<'a, U: Clone> Broadcaster<'a, U> {
    #[must_use]
    pub fn new(registry: &'a ChannelRegistry<U>, connections: &'a ConnectionManager<U>) -> Self {
        Self {
            registry,
            connections,
        }
    }

    /// Broadcast `message` to `channel_id`.
    ///
    /// The message is encoded once and queued on every open subscriber socket
    /// in join order. Subscribers whose socket has closed are removed. When
    /// the channel replays its latest message, the cache is updated first,
    /// even if nobody is subscribed.
    ///
    /// Returns the number of sockets the message was queued on.
    ///
    /// # Errors
    ///
    /// Fails if the channel does not exist or the message cannot be encoded.
    pub fn send(&self, channel_id: &str, message: Value) -> Result<usize, BrokerError> {
        let mut dead = Vec::new();
        let delivered = {
            // Held for the whole fan-out; joins to this channel wait on it.
            let mut entry = self
                .registry
                .entry_mut(channel_id)
                .ok_or_else(|| BrokerError::ChannelNotFound(channel_id.to_string()))?;

            let frame: Arc<str> = Arc::from(encode(&message)?);
            if entry.config.send_latest_on_connect {
                entry.latest = Some(message);
            }

            let mut delivered = 0;
            for id in self.connections.subscribers(channel_id) {
                match self.connections.socket(&id) {
                    Some(socket) if socket.send(Arc::clone(&frame)) => delivered += 1,
                    _ => dead.push(id),
                }
            }
            delivered
        };

        for id in &dead {
            trace!(client = %id, channel = %channel_id, "Reaping closed socket");
            self.connections.remove_client(id);
        }

        debug!(
            channel = %channel_id,
            delivered,
            reaped = dead.len(),
            "Broadcast"
        );
        metrics::record_outbound(delivered);
        Ok(delivered)
    }
}
