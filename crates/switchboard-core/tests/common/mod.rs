//! Shared helpers for broker integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use switchboard_core::{AuthError, AuthGuard, Broker, BrokerConfig, FnGuard};
use switchboard_protocol::HandshakeRequest;
use switchboard_transport::{MemoryClient, MemoryTransport, ServerFrame, Transport};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};

pub const WAIT: Duration = Duration::from_secs(2);

/// A running broker fed by an in-memory transport.
pub struct Harness {
    pub broker: Broker<String>,
    pub transport: Arc<MemoryTransport>,
    pub handle: JoinHandle<()>,
}

impl Harness {
    pub fn start() -> Self {
        Self::with(None::<FnGuard<fn(&HandshakeRequest) -> GuardResult>>)
    }

    pub fn with_guard(guard: impl AuthGuard<String> + 'static) -> Self {
        Self::with(Some(guard))
    }

    fn with(guard: Option<impl AuthGuard<String> + 'static>) -> Self {
        let transport = Arc::new(MemoryTransport::new());
        let mut builder = Broker::builder(BrokerConfig::default())
            .shared_transport(Arc::clone(&transport) as Arc<dyn Transport>);
        if let Some(guard) = guard {
            builder = builder.auth_guard(guard);
        }
        let broker = builder.build();
        let handle = broker.start().expect("broker starts");
        Self {
            broker,
            transport,
            handle,
        }
    }

    pub fn connect(&self, uri: &str) -> MemoryClient {
        self.transport.connect(uri)
    }

    /// Connect and wait until the broker has registered the client.
    pub async fn subscribe(&self, channel: &str) -> MemoryClient {
        let before = self.broker.stats().clients;
        let client = self.connect(&format!("/ServerChannel/{channel}"));
        wait_until(|| self.broker.stats().clients > before).await;
        client
    }
}

pub type GuardResult = Result<Option<String>, AuthError>;

/// Guard admitting `?token=<name>` as user `<name>`.
pub fn token_guard() -> FnGuard<fn(&HandshakeRequest) -> GuardResult> {
    fn check(req: &HandshakeRequest) -> GuardResult {
        match req.bearer_token().as_deref() {
            Some("bad") => Err(AuthError::InvalidCredentials),
            Some(user) => Ok(Some(user.to_string())),
            None => Err(AuthError::MissingCredentials),
        }
    }
    FnGuard::new(check as fn(&HandshakeRequest) -> GuardResult)
}

/// Poll `condition` until it holds, panicking after [`WAIT`].
pub async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in time");
        sleep(Duration::from_millis(5)).await;
    }
}

/// Next frame from the server, panicking on timeout.
pub async fn next_frame(client: &mut MemoryClient) -> ServerFrame {
    timeout(WAIT, client.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("connection dropped")
}

/// Assert no frame arrives within a short grace period.
pub async fn assert_silent(client: &mut MemoryClient) {
    sleep(Duration::from_millis(50)).await;
    assert_eq!(client.try_recv(), None);
}

pub fn text(json: &str) -> ServerFrame {
    ServerFrame::Text(json.to_string())
}

pub fn close(reason: &str) -> ServerFrame {
    ServerFrame::Close {
        code: 1008,
        reason: reason.to_string(),
    }
}
