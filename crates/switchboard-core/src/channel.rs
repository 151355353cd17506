//! Channel definitions and handles.
//!
//! A channel is a named topic; clients subscribe by connecting to its path.

use crate::auth::Identity;
use crate::broker::Broker;
use crate::error::BrokerError;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use switchboard_protocol::SharedChannelDef;

/// Maximum channel name length.
pub const MAX_CHANNEL_NAME_LENGTH: usize = 256;

/// A channel identifier.
pub type ChannelId = String;

/// Validate a channel name.
///
/// Names must be addressable as the last segment of an upgrade path.
///
/// # Errors
///
/// Returns an error message if the channel name is invalid.
pub fn validate_channel_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Channel name cannot be empty");
    }
    if name.len() > MAX_CHANNEL_NAME_LENGTH {
        return Err("Channel name too long");
    }
    if name.contains(['/', '?', '#']) {
        return Err("Channel name cannot contain '/', '?' or '#'");
    }
    if !name.chars().all(|c| c.is_ascii_graphic()) {
        return Err("Channel name contains invalid characters");
    }
    Ok(())
}

/// What a caller asks for when opening a channel.
#[derive(Debug, Clone)]
pub struct ChannelDefinition {
    /// Explicit id; a random `auto_` id is generated when absent.
    pub id: Option<ChannelId>,
    /// Listed publicly.
    pub published: bool,
    /// Connections must pass the auth guard.
    pub auth_required: bool,
    /// Replay the latest broadcast to new subscribers.
    pub send_latest_on_connect: bool,
    /// Free-form description.
    pub description: String,
}

impl Default for ChannelDefinition {
    fn default() -> Self {
        Self {
            id: None,
            published: false,
            auth_required: false,
            send_latest_on_connect: true,
            description: String::new(),
        }
    }
}

impl ChannelDefinition {
    /// A definition with defaults and a generated id.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A definition with an explicit id.
    #[must_use]
    pub fn with_id(id: impl Into<ChannelId>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn published(mut self, published: bool) -> Self {
        self.published = published;
        self
    }

    #[must_use]
    pub fn auth_required(mut self, required: bool) -> Self {
        self.auth_required = required;
        self
    }

    #[must_use]
    pub fn send_latest_on_connect(mut self, enabled: bool) -> Self {
        self.send_latest_on_connect = enabled;
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl From<&SharedChannelDef> for ChannelDefinition {
    fn from(def: &SharedChannelDef) -> Self {
        Self {
            id: Some(def.id.clone()),
            published: true,
            auth_required: def.auth_required,
            send_latest_on_connect: def.send_latest_on_connect,
            description: def.description.clone(),
        }
    }
}

/// A registered channel's resolved configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub id: ChannelId,
    pub published: bool,
    pub auth_required: bool,
    pub send_latest_on_connect: bool,
    /// Set for shared channels; such channels can never be closed.
    pub keep_open: bool,
    pub description: String,
}

impl ChannelConfig {
    pub(crate) fn resolve(definition: ChannelDefinition, id: ChannelId, keep_open: bool) -> Self {
        Self {
            id,
            published: definition.published,
            auth_required: definition.auth_required,
            send_latest_on_connect: definition.send_latest_on_connect,
            keep_open,
            description: definition.description,
        }
    }
}

/// Handle to a registered channel.
pub struct Channel<U> {
    config: Arc<ChannelConfig>,
    broker: Broker<U>,
}

impl<U> Clone for Channel<U> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            broker: self.broker.clone(),
        }
    }
}

impl<U: Identity> Channel<U> {
    pub(crate) fn new(config: Arc<ChannelConfig>, broker: Broker<U>) -> Self {
        Self { config, broker }
    }

    /// Get the channel id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// Get the resolved configuration.
    #[must_use]
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Broadcast a message to every subscriber.
    ///
    /// Returns the number of sockets the message was queued on.
    ///
    /// # Errors
    ///
    /// Fails if the channel has been closed or the message cannot be encoded.
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) -> Result<usize, BrokerError> {
        self.broker.send(&self.config.id, message)
    }

    /// Close the channel.
    ///
    /// # Errors
    ///
    /// Fails if the channel is already closed or is a shared channel.
    pub fn close(&self) -> Result<(), BrokerError> {
        self.broker.close_channel(&self.config.id)
    }
}

/// Handles to the channels created by
/// [`Broker::register_shared_channels`].
pub struct SharedChannels<U> {
    channels: HashMap<ChannelId, Channel<U>>,
}

impl<U> SharedChannels<U> {
    pub(crate) fn new(channels: HashMap<ChannelId, Channel<U>>) -> Self {
        Self { channels }
    }

    /// Get a shared channel by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Channel<U>> {
        self.channels.get(id)
    }

    /// Iterate over all shared channels.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Channel<U>)> {
        self.channels.iter().map(|(id, ch)| (id.as_str(), ch))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
