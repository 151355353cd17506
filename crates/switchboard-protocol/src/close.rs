//! Close codes and reasons.
//!
//! All application-level rejections reuse `1008` (policy violation) and are
//! told apart by the reason string.

use std::fmt;

/// Normal closure.
pub const NORMAL: u16 = 1000;

/// Policy violation, used for every application-level rejection.
pub const POLICY_VIOLATION: u16 = 1008;

/// Why the broker closed a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// The upgrade path does not have the shape `/<prefix>/<channel>`.
    InvalidPath,
    /// The requested channel is not registered.
    MissingChannel,
    /// The channel requires auth but the broker has no auth guard.
    AuthNotConfigured,
    /// The auth guard rejected the request.
    AuthFailed,
    /// An inbound frame was not valid JSON.
    InvalidJson,
}

impl CloseReason {
    /// Every reason, in protocol order.
    pub const ALL: [CloseReason; 5] = [
        CloseReason::InvalidPath,
        CloseReason::MissingChannel,
        CloseReason::AuthNotConfigured,
        CloseReason::AuthFailed,
        CloseReason::InvalidJson,
    ];

    /// The close code sent with this reason.
    #[must_use]
    pub const fn code(self) -> u16 {
        POLICY_VIOLATION
    }

    /// The reason string sent in the close frame.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            CloseReason::InvalidPath => "invalid/path",
            CloseReason::MissingChannel => "invalid/missing channel",
            CloseReason::AuthNotConfigured => "auth/not-configured",
            CloseReason::AuthFailed => "auth/failed",
            CloseReason::InvalidJson => "invalid/json",
        }
    }

    /// Map a received reason string back to a known reason.
    #[must_use]
    pub fn from_reason(reason: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_str() == reason)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
