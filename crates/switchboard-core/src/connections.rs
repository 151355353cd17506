//! Connected clients and channel subscriptions.

use crate::channel::ChannelId;
use crate::message::{random_id, ClientId, ClientInfo, ClientSocket, CLIENT_PREFIX};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::trace;

/// A client attached to a channel.
#[derive(Debug, Clone)]
pub struct ConnectedClient<U> {
    pub id: ClientId,
    pub channel: ChannelId,
    pub user: Option<U>,
    pub socket: ClientSocket,
}

impl<U: Clone> ConnectedClient<U> {
    /// The view handed to inbound message handlers.
    #[must_use]
    pub fn info(&self) -> ClientInfo<U> {
        ClientInfo {
            id: self.id.clone(),
            user: self.user.clone(),
        }
    }
}

/// Tracks connected clients and which channel each is subscribed to.
///
/// Every id in a subscription list refers to a client in the client table.
/// A client is in exactly one subscription list.
pub struct ConnectionManager<U> {
    clients: DashMap<ClientId, ConnectedClient<U>>,
    subscriptions: DashMap<ChannelId, Vec<ClientId>>,
}

impl<U: Clone> ConnectionManager<U> {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
            subscriptions: DashMap::new(),
        }
    }

    /// Register a client and subscribe it to `channel`.
    ///
    /// Returns the newly generated client id.
    pub fn add_client(
        &self,
        channel: &str,
        user: Option<U>,
        socket: ClientSocket,
    ) -> ClientId {
        let slot = loop {
            if let Entry::Vacant(slot) = self.clients.entry(random_id(CLIENT_PREFIX)) {
                break slot;
            }
        };
        let id = slot.key().clone();
        slot.insert(ConnectedClient {
            id: id.clone(),
            channel: channel.to_string(),
            user,
            socket,
        });

        self.subscriptions
            .entry(channel.to_string())
            .or_default()
            .push(id.clone());

        trace!(client = %id, channel = %channel, "Client subscribed");
        id
    }

    /// Remove a client and all of its subscriptions.
    ///
    /// Returns the removed client, or `None` if it was already gone.
    pub fn remove_client(&self, id: &str) -> Option<ConnectedClient<U>> {
        // Unsubscribe first so no list ever names a missing client.
        let channel = self.clients.get(id).map(|c| c.channel.clone())?;
        if let Some(mut subs) = self.subscriptions.get_mut(&channel) {
            subs.retain(|c| c != id);
        }
        self.subscriptions
            .remove_if(&channel, |_, subs| subs.is_empty());

        let removed = self.clients.remove(id).map(|(_, client)| client);
        if removed.is_some() {
            trace!(client = %id, "Client removed");
        }
        removed
    }

    /// Snapshot of the client ids subscribed to `channel`, in join order.
    #[must_use]
    pub fn subscribers(&self, channel: &str) -> Vec<ClientId> {
        self.subscriptions
            .get(channel)
            .map(|subs| subs.clone())
            .unwrap_or_default()
    }

    /// Get a client by id.
    #[must_use]
    pub fn client(&self, id: &str) -> Option<ConnectedClient<U>> {
        self.clients.get(id).map(|c| c.clone())
    }

    /// Get a client's socket.
    #[must_use]
    pub fn socket(&self, id: &str) -> Option<ClientSocket> {
        self.clients.get(id).map(|c| c.socket.clone())
    }

    /// Drop the subscription list of a closed channel.
    ///
    /// The clients stay registered until their connections end.
    pub fn drop_channel(&self, channel: &str) -> usize {
        self.subscriptions
            .remove(channel)
            .map_or(0, |(_, subs)| subs.len())
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.clients.contains_key(id)
    }

    /// Number of connected clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Number of channels with at least one subscriber.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Number of subscribers on one channel.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.subscriptions.get(channel).map_or(0, |subs| subs.len())
    }
}

impl<U: Clone> Default for ConnectionManager<U> {
    fn default() -> Self {
        Self::new()
    }
}
