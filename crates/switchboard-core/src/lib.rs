//! # switchboard-core
//!
//! Channels, subscriptions and broadcast for the Switchboard broker.
//!
//! This crate provides the broker's building blocks:
//!
//! - **ChannelRegistry** - Registered channels, their handlers and latest message
//! - **ConnectionManager** - Connected clients and the channel → subscriber index
//! - **Broadcaster** - Fan-out to every subscriber, reaping closed sockets
//! - **ConnectionAcceptor** - Per-connection handshake, auth and message pump
//! - **Broker** - Owns all of the above and runs the accept loop
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────────┐
//! │  Transport  │────▶│  Acceptor   │────▶│ ConnectionManager│
//! └─────────────┘     └─────────────┘     └──────────────────┘
//!                            │                     ▲
//!                            ▼                     │
//!                     ┌─────────────┐     ┌─────────────┐
//!                     │  Registry   │◀────│ Broadcaster │
//!                     └─────────────┘     └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use switchboard_core::{Broker, BrokerConfig, ChannelDefinition};
//!
//! let broker: Broker<()> = Broker::new(BrokerConfig::default());
//! let chat = broker
//!     .open_channel(ChannelDefinition::with_id("chat"), None)
//!     .unwrap();
//!
//! // Nobody is listening yet; late joiners get this on connect.
//! assert_eq!(chat.send(&serde_json::json!({"msg": "hi"})).unwrap(), 0);
//! ```

pub mod acceptor;
pub mod auth;
pub mod broadcaster;
pub mod broker;
pub mod channel;
pub mod connections;
pub mod error;
pub mod message;
pub mod metrics;
pub mod registry;

pub use acceptor::ConnectionAcceptor;
pub use auth::{AuthError, AuthGuard, FnGuard, Identity};
pub use broadcaster::Broadcaster;
pub use broker::{Broker, BrokerBuilder, BrokerConfig, BrokerStats};
pub use channel::{Channel, ChannelConfig, ChannelDefinition, ChannelId, SharedChannels};
pub use connections::{ConnectedClient, ConnectionManager};
pub use error::BrokerError;
pub use message::{handler, ClientId, ClientInfo, ClientSocket, MessageHandler};
pub use registry::ChannelRegistry;
