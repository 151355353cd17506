//! The broker: owned state plus the accept loop.

use crate::acceptor::ConnectionAcceptor;
use crate::auth::{AuthGuard, Identity};
use crate::broadcaster::Broadcaster;
use crate::channel::{Channel, ChannelDefinition, SharedChannels};
use crate::connections::ConnectionManager;
use crate::error::BrokerError;
use crate::message::MessageHandler;
use crate::metrics;
use crate::registry::ChannelRegistry;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use switchboard_protocol::{codec, CloseReason, SharedChannelDef, DEFAULT_PREFIX};
use switchboard_transport::{Connection, Transport, TransportError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// First path segment of upgrade requests: `/<path_prefix>/<channel>`.
    pub path_prefix: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            path_prefix: DEFAULT_PREFIX.to_string(),
        }
    }
}

/// Snapshot of broker size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    /// Registered channels.
    pub channels: usize,
    /// Connected clients.
    pub clients: usize,
    /// Channels with at least one subscriber.
    pub subscriptions: usize,
}

struct BrokerInner<U> {
    config: BrokerConfig,
    registry: ChannelRegistry<U>,
    connections: ConnectionManager<U>,
    guard: Option<Arc<dyn AuthGuard<U>>>,
    transport: Option<Arc<dyn Transport>>,
    started: AtomicBool,
    shutdown: watch::Sender<bool>,
}

/// A pub/sub broker.
///
/// Cloning is cheap; every clone shares the same channels and clients. `U`
/// is the identity type produced by the auth guard.
pub struct Broker<U = Value> {
    inner: Arc<BrokerInner<U>>,
}

impl<U> Clone for Broker<U> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Builder for [`Broker`].
pub struct BrokerBuilder<U> {
    config: BrokerConfig,
    guard: Option<Arc<dyn AuthGuard<U>>>,
    transport: Option<Arc<dyn Transport>>,
}

impl<U: Identity> BrokerBuilder<U> {
    #[must_use]
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            guard: None,
            transport: None,
        }
    }

    /// Install the guard consulted for auth-required channels.
    #[must_use]
    pub fn auth_guard(mut self, guard: impl AuthGuard<U> + 'static) -> Self {
        self.guard = Some(Arc::new(guard));
        self
    }

    /// Set the transport connections are accepted from.
    #[must_use]
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Set a transport that is also used elsewhere.
    #[must_use]
    pub fn shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn build(self) -> Broker<U> {
        let (shutdown, _) = watch::channel(false);
        Broker {
            inner: Arc::new(BrokerInner {
                config: self.config,
                registry: ChannelRegistry::new(),
                connections: ConnectionManager::new(),
                guard: self.guard,
                transport: self.transport,
                started: AtomicBool::new(false),
                shutdown,
            }),
        }
    }
}

impl<U: Identity> Broker<U> {
    /// Create a broker with no auth guard and no transport.
    #[must_use]
    pub fn new(config: BrokerConfig) -> Self {
        BrokerBuilder::new(config).build()
    }

    #[must_use]
    pub fn builder(config: BrokerConfig) -> BrokerBuilder<U> {
        BrokerBuilder::new(config)
    }

    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.inner.config
    }

    /// Register a channel.
    ///
    /// # Errors
    ///
    /// Fails if the id is invalid or already registered.
    pub fn open_channel(
        &self,
        definition: ChannelDefinition,
        handler: Option<MessageHandler<U>>,
    ) -> Result<Channel<U>, BrokerError> {
        let config = self.inner.registry.open(definition, false, handler)?;
        metrics::set_active_channels(self.inner.registry.len());
        Ok(Channel::new(config, self.clone()))
    }

    /// Register a fixed set of published, never-closing channels.
    ///
    /// Each channel's inbound handler is taken from `handlers` by id. Must be
    /// called before clients try to connect to these channels.
    ///
    /// # Errors
    ///
    /// Fails on the first definition whose id is invalid or taken; channels
    /// registered before it stay registered.
    pub fn register_shared_channels(
        &self,
        definitions: &[SharedChannelDef],
        mut handlers: HashMap<String, MessageHandler<U>>,
    ) -> Result<SharedChannels<U>, BrokerError> {
        let mut channels = HashMap::with_capacity(definitions.len());
        for def in definitions {
            let handler = handlers.remove(&def.id);
            let config = self
                .inner
                .registry
                .open(ChannelDefinition::from(def), true, handler)?;
            channels.insert(config.id.clone(), Channel::new(config, self.clone()));
        }

        for id in handlers.keys() {
            warn!(channel = %id, "Handler given for unknown shared channel");
        }

        metrics::set_active_channels(self.inner.registry.len());
        info!(count = channels.len(), "Shared channels registered");
        Ok(SharedChannels::new(channels))
    }

    /// Close a channel.
    ///
    /// The subscriber list is dropped; already connected sockets stay open
    /// until their peers leave.
    ///
    /// # Errors
    ///
    /// Fails if the channel does not exist or is a shared channel.
    pub fn close_channel(&self, id: &str) -> Result<(), BrokerError> {
        self.inner.registry.close(id)?;
        let orphaned = self.inner.connections.drop_channel(id);
        metrics::set_active_channels(self.inner.registry.len());
        info!(channel = %id, orphaned, "Channel closed");
        Ok(())
    }

    /// Broadcast a message to every subscriber of a channel.
    ///
    /// Returns the number of sockets the message was queued on.
    ///
    /// # Errors
    ///
    /// Fails if the channel does not exist or the message cannot be encoded.
    pub fn send<T: Serialize + ?Sized>(
        &self,
        channel: &str,
        message: &T,
    ) -> Result<usize, BrokerError> {
        let payload = codec::to_payload(message)?;
        Broadcaster::new(&self.inner.registry, &self.inner.connections).send(channel, payload)
    }

    /// Spawn the accept loop on the configured transport.
    ///
    /// # Errors
    ///
    /// Fails if no transport was configured or the broker is already running.
    pub fn start(&self) -> Result<JoinHandle<()>, BrokerError> {
        let transport = self
            .inner
            .transport
            .clone()
            .ok_or(BrokerError::NoTransport)?;
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(BrokerError::AlreadyStarted);
        }

        let broker = self.clone();
        let mut shutdown = self.inner.shutdown.subscribe();
        info!(
            transport = transport.name(),
            prefix = %self.inner.config.path_prefix,
            "Broker started"
        );

        Ok(tokio::spawn(async move {
            loop {
                let stopping = *shutdown.borrow_and_update();
                if stopping {
                    break;
                }

                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    accepted = transport.accept() => match accepted {
                        Ok(conn) => {
                            let broker = broker.clone();
                            tokio::spawn(async move {
                                broker.handle_connection(conn).await;
                            });
                        }
                        Err(TransportError::Shutdown) => {
                            info!(transport = transport.name(), "Transport shut down");
                            break;
                        }
                        Err(e) => warn!(error = %e, "Accept failed"),
                    }
                }
            }
            info!("Broker stopped");
        }))
    }

    /// Stop accepting connections. Connected clients are not disconnected.
    pub fn shutdown(&self) {
        debug!("Broker shutdown requested");
        self.inner.shutdown.send_replace(true);
    }

    /// Whether [`Broker::start`] has been called.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// Run one connection through the handshake and message pump.
    ///
    /// Returns the reason the broker closed it, or `None` if the peer left.
    pub async fn handle_connection(&self, conn: Box<dyn Connection>) -> Option<CloseReason> {
        ConnectionAcceptor::new(
            &self.inner.registry,
            &self.inner.connections,
            self.inner.guard.as_deref(),
            &self.inner.config.path_prefix,
        )
        .run(conn)
        .await
    }

    #[must_use]
    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            channels: self.inner.registry.len(),
            clients: self.inner.connections.client_count(),
            subscriptions: self.inner.connections.subscription_count(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &ChannelRegistry<U> {
        &self.inner.registry
    }

    #[must_use]
    pub fn connections(&self) -> &ConnectionManager<U> {
        &self.inner.connections
    }
}
