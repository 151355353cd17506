//! The inbound connection-upgrade request, as seen by the broker and its
//! auth guard.

use http::header::{HeaderMap, HeaderName, AUTHORIZATION};
use std::borrow::Cow;

/// A connection-upgrade request.
#[derive(Debug, Clone, Default)]
pub struct HandshakeRequest {
    /// Request path including the query string, e.g. `/ServerChannel/chat?token=x`.
    pub uri: String,
    /// Request headers.
    pub headers: HeaderMap,
    /// Remote peer address, if the transport knows it.
    pub remote_addr: Option<String>,
}

impl HandshakeRequest {
    /// Create a request with no headers.
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            headers: HeaderMap::new(),
            remote_addr: None,
        }
    }

    /// Attach headers.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Attach the remote address.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    /// The path component, without query string.
    #[must_use]
    pub fn path(&self) -> &str {
        self.uri.split('?').next().unwrap_or_default()
    }

    /// The raw query string, if any.
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.uri.split_once('?').map(|(_, q)| q)
    }

    /// Look up a query parameter, percent-decoded.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<Cow<'_, str>> {
        url::form_urlencoded::parse(self.query()?.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Look up a header as a string.
    #[must_use]
    pub fn header(&self, name: impl TryInto<HeaderName>) -> Option<&str> {
        let name = name.try_into().ok()?;
        self.headers.get(name)?.to_str().ok()
    }

    /// The bearer token from the `Authorization` header, falling back to a
    /// `token` query parameter (browsers cannot set headers on upgrades).
    #[must_use]
    pub fn bearer_token(&self) -> Option<Cow<'_, str>> {
        self.headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|v| Cow::Borrowed(v.trim()))
            .or_else(|| self.query_param("token"))
            .filter(|t| !t.is_empty())
    }
}
