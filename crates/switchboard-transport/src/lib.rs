//! # switchboard-transport
//!
//! Transport abstraction layer for the Switchboard broker.
//!
//! This crate provides a unified interface over the ways a client can reach
//! the broker:
//!
//! - **WebSocket** - A standalone tokio-tungstenite listener
//! - **axum** - Upgrades served from an axum router, sharing a port with HTTP routes
//! - **Memory** - In-process queues for tests (feature `memory`)
//!
//! ## Transport Abstraction
//!
//! All transports implement the `Transport` and `Connection` traits,
//! allowing the broker to be protocol-agnostic.
//!
//! ```rust,ignore
//! use switchboard_transport::{Transport, Connection};
//!
//! async fn handle_connection(mut conn: Box<dyn Connection>) {
//!     while let Ok(Some(text)) = conn.recv().await {
//!         // Process frame
//!     }
//! }
//! ```

pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(feature = "axum")]
pub mod axum_ws;

#[cfg(feature = "memory")]
pub mod memory;

pub use traits::{Connection, Transport, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;

#[cfg(feature = "axum")]
pub use axum_ws::AxumTransport;

#[cfg(feature = "memory")]
pub use memory::{MemoryClient, MemoryTransport, ServerFrame};
