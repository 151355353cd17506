//! # switchboard-protocol
//!
//! Wire vocabulary shared by the Switchboard broker and its clients.
//!
//! Every frame, in both directions, is a single JSON value sent as a
//! WebSocket text frame. A client selects a channel by the path it upgrades
//! on (`/<prefix>/<channel>`); application-level rejections close the socket
//! with code `1008` and one of a fixed set of reason strings.
//!
//! ## Example
//!
//! ```rust
//! use switchboard_protocol::{codec, path, CloseReason};
//!
//! let text = codec::encode(&serde_json::json!({"msg": "hi"})).unwrap();
//! let value = codec::decode(&text).unwrap();
//! assert_eq!(value["msg"], "hi");
//!
//! assert_eq!(path::channel_id("/ServerChannel/chat", "ServerChannel"), Ok("chat"));
//! assert_eq!(
//!     path::channel_id("/elsewhere/chat", "ServerChannel"),
//!     Err(CloseReason::InvalidPath)
//! );
//! ```

pub mod close;
pub mod codec;
pub mod handshake;
pub mod path;
pub mod shared;

pub use close::CloseReason;
pub use codec::{decode, encode, ProtocolError};
pub use handshake::HandshakeRequest;
pub use path::DEFAULT_PREFIX;
pub use shared::SharedChannelDef;
