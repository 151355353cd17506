//! Static bearer-token auth guard.

use crate::config::AuthConfig;
use async_trait::async_trait;
use std::collections::HashMap;
use switchboard_core::{AuthError, AuthGuard};
use switchboard_protocol::HandshakeRequest;

/// Admits requests whose bearer token is in a fixed table, as the user the
/// token maps to.
pub struct TokenGuard {
    tokens: HashMap<String, String>,
}

impl TokenGuard {
    #[must_use]
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }

    /// Build a guard from configuration, or `None` if no tokens are set.
    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Option<Self> {
        (!config.tokens.is_empty()).then(|| Self::new(config.tokens.clone()))
    }

    #[must_use]
    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }
}

#[async_trait]
impl AuthGuard<String> for TokenGuard {
    async fn authorize(&self, request: &HandshakeRequest) -> Result<Option<String>, AuthError> {
        let token = request
            .bearer_token()
            .ok_or(AuthError::MissingCredentials)?;
        self.tokens
            .get(token.as_ref())
            .cloned()
            .map(Some)
            .ok_or(AuthError::InvalidCredentials)
    }
}
