//! # switchboard-client
//!
//! Listen to Switchboard channels over WebSocket.
//!
//! A listener connects to `/<prefix>/<channel>`, hands every JSON frame to a
//! callback and reconnects with exponential backoff whenever the connection
//! drops, until cancelled.
//!
//! ```rust,no_run
//! use switchboard_client::{ListenOptions, ServerChannels};
//!
//! # async fn demo() {
//! let channels = ServerChannels::new("ws://localhost:8080");
//! let chat = channels.listen(ListenOptions::new("chat"), |msg| {
//!     println!("received {msg}");
//! });
//!
//! chat.send(&serde_json::json!({"msg": "hi"})).unwrap();
//! chat.cancel();
//! # }
//! ```

pub mod backoff;
pub mod client;

pub use backoff::Backoff;
pub use client::{ChannelClient, ClientError, ListenOptions, ServerChannels};
