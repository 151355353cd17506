//! Shared channel definitions.
//!
//! A fixed set of named channels known to both the broker (which registers
//! them at startup) and its clients (which address them by name).

use serde::{Deserialize, Serialize};

/// A shared channel definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedChannelDef {
    /// Channel id, also the last path segment clients connect to.
    pub id: String,

    /// Whether connecting requires the broker's auth guard to accept.
    #[serde(default)]
    pub auth_required: bool,

    /// Free-form description.
    #[serde(default)]
    pub description: String,

    /// Replay the latest broadcast to newly connected clients.
    #[serde(default = "default_true")]
    pub send_latest_on_connect: bool,
}

fn default_true() -> bool {
    true
}

impl SharedChannelDef {
    /// Create a definition with defaults.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            auth_required: false,
            description: String::new(),
            send_latest_on_connect: true,
        }
    }

    /// Require authentication.
    #[must_use]
    pub fn auth_required(mut self, required: bool) -> Self {
        self.auth_required = required;
        self
    }

    /// Set the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Enable or disable latest-message replay.
    #[must_use]
    pub fn send_latest_on_connect(mut self, enabled: bool) -> Self {
        self.send_latest_on_connect = enabled;
        self
    }
}
