//! HTTP routes and broker wiring for the Switchboard server.

use crate::auth::TokenGuard;
use crate::config::Config;
use crate::metrics;
use anyhow::{Context, Result};
use axum::{extract::State, response::IntoResponse, routing::get, Router};
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use switchboard_core::{handler, Broker, BrokerConfig, ClientInfo, MessageHandler};
use switchboard_transport::{AxumTransport, Transport};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A wired broker and the router serving it.
pub struct App {
    /// The broker, already accepting connections from the router.
    pub broker: Broker<String>,
    /// Health route plus the upgrade fallback.
    pub router: Router,
    relay: JoinHandle<()>,
}

/// Run the HTTP/WebSocket server until interrupted.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {:#}", e);
        }
    }

    let app = build_app(&config)?;

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Switchboard listening on {}", addr);
    info!(
        "Channel endpoint: ws://{}/{}/<channel>",
        addr, config.broker.path_prefix
    );

    serve(listener, app, shutdown_signal()).await
}

/// Build the broker, register the configured channels and start accepting.
///
/// Must be called inside a tokio runtime.
///
/// # Errors
///
/// Returns an error if a configured channel cannot be registered.
pub fn build_app(config: &Config) -> Result<App> {
    let transport = Arc::new(AxumTransport::new(config.limits.max_message_size));
    let upgrades = transport.router();

    let mut builder = Broker::builder(BrokerConfig {
        path_prefix: config.broker.path_prefix.clone(),
    })
    .shared_transport(transport as Arc<dyn Transport>);

    match TokenGuard::from_config(&config.auth) {
        Some(guard) => {
            info!(tokens = guard.token_count(), "Token auth enabled");
            builder = builder.auth_guard(guard);
        }
        None => info!("No auth tokens configured, auth-required channels will be refused"),
    }
    let broker = builder.build();

    let (relay_tx, relay_rx) = mpsc::unbounded_channel();
    let handlers: HashMap<String, MessageHandler<String>> = config
        .channels
        .iter()
        .map(|def| (def.id.clone(), relay_handler(&def.id, relay_tx.clone())))
        .collect();
    drop(relay_tx);

    broker
        .register_shared_channels(&config.channels, handlers)
        .context("Failed to register configured channels")?;
    let relay = tokio::spawn(relay(broker.clone(), relay_rx));
    broker.start().context("Failed to start broker")?;

    let router = Router::new()
        .route("/health", get(health_handler))
        .with_state(broker.clone())
        .merge(upgrades);

    Ok(App {
        broker,
        router,
        relay,
    })
}

/// Serve `app` on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the HTTP server fails.
pub async fn serve(
    listener: TcpListener,
    app: App,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    axum::serve(
        listener,
        app.router
            .into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .context("HTTP server failed")?;

    app.broker.shutdown();
    app.relay.abort();
    info!("Switchboard stopped");
    Ok(())
}

/// Forward inbound messages of `channel` to the relay task.
///
/// Holds only the queue, never the broker.
fn relay_handler(
    channel: &str,
    tx: mpsc::UnboundedSender<(String, Value)>,
) -> MessageHandler<String> {
    let channel = channel.to_string();
    handler(move |client: &ClientInfo<String>, value| {
        debug!(
            channel = %channel,
            client = %client.id,
            user = ?client.user,
            "Relaying message"
        );
        let _ = tx.send((channel.clone(), value));
    })
}

/// Rebroadcast relayed messages to their channel.
async fn relay(broker: Broker<String>, mut rx: mpsc::UnboundedReceiver<(String, Value)>) {
    while let Some((channel, value)) = rx.recv().await {
        if let Err(e) = broker.send(&channel, &value) {
            warn!(channel = %channel, error = %e, "Relay failed");
        }
    }
}

/// Health check handler.
async fn health_handler(State(broker): State<Broker<String>>) -> impl IntoResponse {
    let stats = broker.stats();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "channels": stats.channels,
        "clients": stats.clients,
    }))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use switchboard_protocol::SharedChannelDef;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::Message;

    const WAIT: Duration = Duration::from_secs(5);

    struct Running {
        addr: SocketAddr,
        broker: Broker<String>,
        stop: oneshot::Sender<()>,
    }

    async fn start(config: Config) -> Running {
        let app = build_app(&config).unwrap();
        let broker = app.broker.clone();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel();
        tokio::spawn(serve(listener, app, async {
            let _ = stopped.await;
        }));
        Running { addr, broker, stop }
    }

    fn config() -> Config {
        Config {
            channels: vec![
                SharedChannelDef::new("lobby"),
                SharedChannelDef::new("staff").auth_required(true),
            ],
            ..Config::default()
        }
    }

    async fn next_text(
        ws: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
                  + Unpin),
    ) -> Message {
        timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let server = start(config()).await;

        let mut stream = TcpStream::connect(server.addr).await.unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        let body = response.split("\r\n\r\n").nth(1).unwrap();
        let json: Value = serde_json::from_str(body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["channels"], 2);
        assert_eq!(json["clients"], 0);

        let _ = server.stop.send(());
    }

    #[tokio::test]
    async fn test_configured_channel_relays() {
        let server = start(config()).await;
        let url = format!("ws://{}/ServerChannel/lobby", server.addr);

        let (mut speaker, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        let (mut listener, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        let deadline = tokio::time::Instant::now() + WAIT;
        while server.broker.stats().clients < 2 {
            assert!(tokio::time::Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        speaker
            .send(Message::Text(r#"{"msg":"hi"}"#.into()))
            .await
            .unwrap();
        assert_eq!(
            next_text(&mut listener).await,
            Message::Text(r#"{"msg":"hi"}"#.into())
        );
        assert_eq!(
            next_text(&mut speaker).await,
            Message::Text(r#"{"msg":"hi"}"#.into())
        );

        let _ = server.stop.send(());
    }

    #[tokio::test]
    async fn test_auth_channel_without_tokens() {
        let server = start(config()).await;
        let url = format!("ws://{}/ServerChannel/staff", server.addr);

        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        match next_text(&mut ws).await {
            Message::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), 1008);
                assert_eq!(frame.reason, "auth/not-configured");
            }
            other => panic!("expected close, got {other:?}"),
        }

        let _ = server.stop.send(());
    }

    #[tokio::test]
    async fn test_auth_channel_with_token() {
        let mut config = config();
        config
            .auth
            .tokens
            .insert("s3cret".to_string(), "alice".to_string());
        let server = start(config).await;

        let url = format!("ws://{}/ServerChannel/staff?token=s3cret", server.addr);
        let (_ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

        let deadline = tokio::time::Instant::now() + WAIT;
        while server.broker.stats().clients < 1 {
            assert!(tokio::time::Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let subscriber = server.broker.connections().subscribers("staff");
        let client = server.broker.connections().client(&subscriber[0]).unwrap();
        assert_eq!(client.user.as_deref(), Some("alice"));

        let _ = server.stop.send(());
    }
}
