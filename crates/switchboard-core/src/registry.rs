//! Channel registry.
//!
//! Owns every known channel, its configuration, its inbound handler and its
//! latest-message cache.

use crate::channel::{validate_channel_name, ChannelConfig, ChannelDefinition, ChannelId};
use crate::error::BrokerError;
use crate::message::{random_id, MessageHandler, AUTO_CHANNEL_PREFIX};
use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::{Ref, RefMut};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Registry state for one channel.
pub(crate) struct ChannelEntry<U> {
    pub(crate) config: Arc<ChannelConfig>,
    pub(crate) handler: Option<MessageHandler<U>>,
    /// Last broadcast payload, kept only when `send_latest_on_connect` is set.
    pub(crate) latest: Option<Value>,
}

/// The set of registered channels.
pub struct ChannelRegistry<U> {
    channels: DashMap<ChannelId, ChannelEntry<U>>,
}

impl<U> ChannelRegistry<U> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Register a channel.
    ///
    /// The definition's id is used verbatim when present; otherwise a random
    /// `auto_` id that does not collide with any registered channel is used.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is invalid or already registered.
    pub fn open(
        &self,
        definition: ChannelDefinition,
        keep_open: bool,
        handler: Option<MessageHandler<U>>,
    ) -> Result<Arc<ChannelConfig>, BrokerError> {
        let slot = match definition.id.clone() {
            Some(id) => {
                validate_channel_name(&id).map_err(BrokerError::InvalidChannel)?;
                match self.channels.entry(id) {
                    Entry::Occupied(e) => {
                        return Err(BrokerError::ChannelAlreadyExists(e.key().clone()));
                    }
                    Entry::Vacant(slot) => slot,
                }
            }
            None => loop {
                if let Entry::Vacant(slot) = self.channels.entry(random_id(AUTO_CHANNEL_PREFIX)) {
                    break slot;
                }
            },
        };

        let id = slot.key().clone();
        let config = Arc::new(ChannelConfig::resolve(definition, id, keep_open));
        slot.insert(ChannelEntry {
            config: Arc::clone(&config),
            handler,
            latest: None,
        });

        info!(
            channel = %config.id,
            auth = config.auth_required,
            keep_open = config.keep_open,
            "Channel opened"
        );
        Ok(config)
    }

    /// Remove a channel, dropping its latest-message cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel does not exist or is keep-open.
    pub fn close(&self, id: &str) -> Result<Arc<ChannelConfig>, BrokerError> {
        if let Some((_, entry)) = self.channels.remove_if(id, |_, e| !e.config.keep_open) {
            debug!(channel = %id, "Channel removed from registry");
            return Ok(entry.config);
        }

        if self.channels.contains_key(id) {
            Err(BrokerError::ChannelKeepOpen(id.to_string()))
        } else {
            Err(BrokerError::ChannelNotFound(id.to_string()))
        }
    }

    /// Check if a channel exists.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.channels.contains_key(id)
    }

    /// Get a channel's configuration.
    #[must_use]
    pub fn config(&self, id: &str) -> Option<Arc<ChannelConfig>> {
        self.channels.get(id).map(|e| Arc::clone(&e.config))
    }

    /// Get a channel's inbound handler.
    #[must_use]
    pub fn handler(&self, id: &str) -> Option<MessageHandler<U>> {
        self.channels.get(id).and_then(|e| e.handler.clone())
    }

    /// Get the cached latest message of a channel.
    #[must_use]
    pub fn latest(&self, id: &str) -> Option<Value> {
        self.channels.get(id).and_then(|e| e.latest.clone())
    }

    /// Get all channel ids.
    #[must_use]
    pub fn ids(&self) -> Vec<ChannelId> {
        self.channels.iter().map(|e| e.key().clone()).collect()
    }

    /// Get the configurations of all published channels.
    #[must_use]
    pub fn published(&self) -> Vec<Arc<ChannelConfig>> {
        self.channels
            .iter()
            .filter(|e| e.config.published)
            .map(|e| Arc::clone(&e.config))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Shared access to an entry. Joins hold this while subscribing.
    pub(crate) fn entry(&self, id: &str) -> Option<Ref<'_, ChannelId, ChannelEntry<U>>> {
        self.channels.get(id)
    }

    /// Exclusive access to an entry. Broadcasts hold this for the whole fan-out.
    pub(crate) fn entry_mut(&self, id: &str) -> Option<RefMut<'_, ChannelId, ChannelEntry<U>>> {
        self.channels.get_mut(id)
    }
}

impl<U> Default for ChannelRegistry<U> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Registry = ChannelRegistry<()>;

    #[test]
    fn test_open_with_explicit_id() {
        let registry = Registry::new();
        let config = registry
            .open(ChannelDefinition::with_id("chat"), false, None)
            .unwrap();

        assert_eq!(config.id, "chat");
        assert!(!config.published);
        assert!(!config.auth_required);
        assert!(config.send_latest_on_connect);
        assert!(registry.contains("chat"));
    }

    #[test]
    fn test_open_duplicate_fails() {
        let registry = Registry::new();
        registry
            .open(ChannelDefinition::with_id("chat"), false, None)
            .unwrap();

        assert!(matches!(
            registry.open(ChannelDefinition::with_id("chat").published(true), false, None),
            Err(BrokerError::ChannelAlreadyExists(id)) if id == "chat"
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_open_generates_unique_ids() {
        let registry = Registry::new();
        let a = registry.open(ChannelDefinition::new(), false, None).unwrap();
        let b = registry.open(ChannelDefinition::new(), false, None).unwrap();

        assert!(a.id.starts_with("auto_"));
        assert_eq!(a.id.len(), "auto_".len() + 15);
        assert_ne!(a.id, b.id);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_open_invalid_id() {
        let registry = Registry::new();
        assert!(matches!(
            registry.open(ChannelDefinition::with_id("a/b"), false, None),
            Err(BrokerError::InvalidChannel(_))
        ));
    }

    #[test]
    fn test_close() {
        let registry = Registry::new();
        registry
            .open(ChannelDefinition::with_id("temp"), false, None)
            .unwrap();

        registry.close("temp").unwrap();
        assert!(!registry.contains("temp"));

        assert!(matches!(
            registry.close("temp"),
            Err(BrokerError::ChannelNotFound(_))
        ));
    }

    #[test]
    fn test_close_keep_open_fails() {
        let registry = Registry::new();
        registry
            .open(ChannelDefinition::with_id("shared"), true, None)
            .unwrap();

        assert!(matches!(
            registry.close("shared"),
            Err(BrokerError::ChannelKeepOpen(_))
        ));
        assert!(registry.contains("shared"));
    }

    #[test]
    fn test_published_listing() {
        let registry = Registry::new();
        registry
            .open(ChannelDefinition::with_id("public").published(true), false, None)
            .unwrap();
        registry
            .open(ChannelDefinition::with_id("private"), false, None)
            .unwrap();

        let published = registry.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].id, "public");
    }
}
