//! Client identity, outbound sockets and message handlers.

use rand::Rng;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A connected client's identifier.
pub type ClientId = String;

/// Length of the random part of generated ids.
pub const ID_LENGTH: usize = 15;

/// Prefix of generated channel ids.
pub const AUTO_CHANNEL_PREFIX: &str = "auto_";

/// Prefix of client ids.
pub const CLIENT_PREFIX: &str = "client_";

const ID_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Generate a random lowercase alphanumeric id.
///
/// Uniqueness is the caller's job: insert through a vacant map entry and
/// retry on collision.
#[must_use]
pub fn random_id(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let mut id = String::with_capacity(prefix.len() + ID_LENGTH);
    id.push_str(prefix);
    for _ in 0..ID_LENGTH {
        id.push(char::from(ID_CHARSET[rng.gen_range(0..ID_CHARSET.len())]));
    }
    id
}

/// The sending client, as passed to inbound message handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo<U> {
    /// Client id.
    pub id: ClientId,
    /// Identity returned by the auth guard, if the channel required auth.
    pub user: Option<U>,
}

/// Callback for inbound messages on a channel.
pub type MessageHandler<U> = Arc<dyn Fn(&ClientInfo<U>, Value) + Send + Sync>;

/// Wrap a closure as a [`MessageHandler`].
pub fn handler<U, F>(f: F) -> MessageHandler<U>
where
    F: Fn(&ClientInfo<U>, Value) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Write side of a client socket.
///
/// Frames are queued and written by the connection's task, so sending never
/// suspends. The socket counts as closed once that task has ended.
#[derive(Debug, Clone)]
pub struct ClientSocket {
    tx: mpsc::UnboundedSender<Arc<str>>,
}

impl ClientSocket {
    /// Create a socket and the queue its frames are drained from.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Arc<str>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Whether the connection task is still draining this socket.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Queue an encoded frame. Returns `false` if the socket is closed.
    pub fn send(&self, frame: Arc<str>) -> bool {
        self.tx.send(frame).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_random_id_shape() {
        let id = random_id(CLIENT_PREFIX);
        assert!(id.starts_with("client_"));
        assert_eq!(id.len(), CLIENT_PREFIX.len() + ID_LENGTH);
        assert!(id[CLIENT_PREFIX.len()..]
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_random_ids_differ() {
        let ids: HashSet<String> = (0..100).map(|_| random_id("")).collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn test_socket_closes_with_receiver() {
        let (socket, mut rx) = ClientSocket::channel();
        assert!(socket.is_open());
        assert!(socket.send(Arc::from("1")));
        assert_eq!(rx.try_recv().unwrap().as_ref(), "1");

        drop(rx);
        assert!(!socket.is_open());
        assert!(!socket.send(Arc::from("2")));
    }
}
