//! Broker errors.

use switchboard_protocol::ProtocolError;
use thiserror::Error;

/// Usage errors surfaced to the code driving the broker.
///
/// Misbehaving remote peers never produce these; they are closed with a
/// [`switchboard_protocol::CloseReason`] instead.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// A channel with this id is already registered.
    #[error("Channel already exists: {0}")]
    ChannelAlreadyExists(String),

    /// No channel with this id is registered.
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    /// The channel was registered as shared and cannot be closed.
    #[error("Channel {0} is marked as keep-open and cannot be closed")]
    ChannelKeepOpen(String),

    /// Invalid channel id.
    #[error("Invalid channel id: {0}")]
    InvalidChannel(&'static str),

    /// `start` was called twice.
    #[error("Broker already started")]
    AlreadyStarted,

    /// `start` was called without a transport.
    #[error("No transport configured")]
    NoTransport,

    /// The message could not be encoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}
