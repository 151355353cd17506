//! Connection authorization.

use async_trait::async_trait;
use switchboard_protocol::HandshakeRequest;
use thiserror::Error;

/// Identity payload attached to authenticated clients.
pub trait Identity: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Identity for T {}

/// Why an auth guard refused a connection.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing credentials")]
    MissingCredentials,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Authorization failed: {0}")]
    Other(String),
}

/// Decides whether a connection may join an auth-required channel.
///
/// Only `Ok(Some(user))` admits the connection; the user is attached to the
/// client and handed to inbound message handlers. `Ok(None)` and errors both
/// close the connection with `auth/failed`.
#[async_trait]
pub trait AuthGuard<U>: Send + Sync {
    /// Authorize an upgrade request.
    async fn authorize(&self, request: &HandshakeRequest) -> Result<Option<U>, AuthError>;
}

/// An [`AuthGuard`] backed by a synchronous closure.
pub struct FnGuard<F>(F);

impl<F> FnGuard<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<U, F> AuthGuard<U> for FnGuard<F>
where
    U: Identity,
    F: Fn(&HandshakeRequest) -> Result<Option<U>, AuthError> + Send + Sync,
{
    async fn authorize(&self, request: &HandshakeRequest) -> Result<Option<U>, AuthError> {
        (self.0)(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_guard() {
        let guard = FnGuard::new(|req: &HandshakeRequest| match req.bearer_token().as_deref() {
            Some("secret") => Ok(Some("alice".to_string())),
            Some(_) => Err(AuthError::InvalidCredentials),
            None => Err(AuthError::MissingCredentials),
        });

        let ok = HandshakeRequest::new("/ServerChannel/secure?token=secret");
        assert_eq!(
            guard.authorize(&ok).await.unwrap(),
            Some("alice".to_string())
        );

        let bad = HandshakeRequest::new("/ServerChannel/secure?token=nope");
        assert!(matches!(
            guard.authorize(&bad).await,
            Err(AuthError::InvalidCredentials)
        ));

        let none = HandshakeRequest::new("/ServerChannel/secure");
        assert!(matches!(
            guard.authorize(&none).await,
            Err(AuthError::MissingCredentials)
        ));
    }
}
