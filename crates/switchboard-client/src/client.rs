//! Channel listeners.
//!
//! A listener keeps one WebSocket open to a channel, reconnecting on every
//! close until it is cancelled.

use crate::backoff::{Backoff, DEFAULT_INITIAL_DELAY};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use switchboard_protocol::{
    codec, path, CloseReason, ProtocolError, SharedChannelDef, DEFAULT_PREFIX,
};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The name is not among the configured shared channels.
    #[error("Unknown shared channel: {0}")]
    UnknownSharedChannel(String),

    /// The message could not be encoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// What to listen to and how to reconnect.
#[derive(Debug, Clone)]
pub struct ListenOptions {
    /// Channel id.
    pub channel: String,
    /// Back off exponentially between reconnects; otherwise reconnect
    /// immediately.
    pub reconnect_on_fail: bool,
    /// First reconnect delay.
    pub initial_delay: Duration,
}

impl ListenOptions {
    #[must_use]
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            reconnect_on_fail: true,
            initial_delay: DEFAULT_INITIAL_DELAY,
        }
    }

    #[must_use]
    pub fn reconnect_on_fail(mut self, enabled: bool) -> Self {
        self.reconnect_on_fail = enabled;
        self
    }

    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }
}

/// Entry point for listening to a broker's channels.
#[derive(Debug, Clone)]
pub struct ServerChannels {
    base_url: String,
    prefix: String,
    shared: HashMap<String, SharedChannelDef>,
}

impl ServerChannels {
    /// Target a broker, e.g. `ws://localhost:8080`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            prefix: DEFAULT_PREFIX.to_string(),
            shared: HashMap::new(),
        }
    }

    /// Use a path prefix other than `ServerChannel`.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Declare the broker's shared channels, enabling [`ServerChannels::shared`].
    #[must_use]
    pub fn with_shared(mut self, definitions: impl IntoIterator<Item = SharedChannelDef>) -> Self {
        self.shared
            .extend(definitions.into_iter().map(|def| (def.id.clone(), def)));
        self
    }

    /// The declared shared channels.
    pub fn shared_channels(&self) -> impl Iterator<Item = &SharedChannelDef> {
        self.shared.values()
    }

    /// Full URL of a channel.
    #[must_use]
    pub fn url(&self, channel: &str) -> String {
        format!("{}{}", self.base_url, path::channel_path(&self.prefix, channel))
    }

    /// Start listening to a channel.
    ///
    /// Every inbound JSON frame is passed to `on_message`. Must be called
    /// inside a tokio runtime.
    pub fn listen<F>(&self, options: ListenOptions, on_message: F) -> ChannelClient
    where
        F: FnMut(Value) + Send + 'static,
    {
        ChannelClient::spawn(self.url(&options.channel), options, on_message)
    }

    /// Start listening to a declared shared channel.
    ///
    /// `options.channel` is replaced by `name`.
    ///
    /// # Errors
    ///
    /// Fails if `name` was not declared with [`ServerChannels::with_shared`].
    pub fn shared<F>(
        &self,
        name: &str,
        options: ListenOptions,
        on_message: F,
    ) -> Result<ChannelClient, ClientError>
    where
        F: FnMut(Value) + Send + 'static,
    {
        let def = self
            .shared
            .get(name)
            .ok_or_else(|| ClientError::UnknownSharedChannel(name.to_string()))?;
        Ok(self.listen(
            ListenOptions {
                channel: def.id.clone(),
                ..options
            },
            on_message,
        ))
    }
}

type Outbound = Option<mpsc::UnboundedSender<String>>;

/// Handle to a running listener.
///
/// Dropping the handle cancels the listener.
pub struct ChannelClient {
    channel: String,
    outbound: watch::Receiver<Outbound>,
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ChannelClient {
    fn spawn<F>(url: String, options: ListenOptions, on_message: F) -> Self
    where
        F: FnMut(Value) + Send + 'static,
    {
        let (outbound_tx, outbound) = watch::channel(None);
        let (cancel, cancel_rx) = watch::channel(false);
        let backoff = Backoff::for_listener(options.reconnect_on_fail, options.initial_delay);

        let task = tokio::spawn(run(
            Listener {
                url,
                channel: options.channel.clone(),
                outbound: outbound_tx,
                cancel: cancel_rx,
            },
            backoff,
            on_message,
        ));

        Self {
            channel: options.channel,
            outbound,
            cancel,
            task,
        }
    }

    /// Channel id.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Send a message if connected.
    ///
    /// There is no buffering: while disconnected the message is dropped with
    /// a warning.
    ///
    /// # Errors
    ///
    /// Fails only if the message cannot be encoded.
    pub fn send<T: Serialize + ?Sized>(&self, data: &T) -> Result<(), ClientError> {
        let text = codec::encode(data)?;
        let delivered = self
            .outbound
            .borrow()
            .as_ref()
            .is_some_and(|tx| tx.send(text).is_ok());
        if !delivered {
            warn!(channel = %self.channel, "Not connected, dropping message");
        }
        Ok(())
    }

    /// Whether a connection is currently open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.outbound.borrow().is_some()
    }

    /// Close the connection and stop reconnecting.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// Wait for the listener to stop. It only stops once cancelled.
    pub async fn join(self) {
        let Self { task, cancel, .. } = self;
        if let Err(e) = task.await {
            warn!(error = %e, "Listener task failed");
        }
        drop(cancel);
    }
}

struct Listener {
    url: String,
    channel: String,
    outbound: watch::Sender<Outbound>,
    cancel: watch::Receiver<bool>,
}

/// How a connection ended.
enum Ended {
    Dropped,
    Cancelled,
}

async fn run<F>(mut listener: Listener, mut backoff: Backoff, mut on_message: F)
where
    F: FnMut(Value) + Send + 'static,
{
    loop {
        let connected = tokio::select! {
            result = connect_async(listener.url.as_str()) => result,
            () = cancelled(&mut listener.cancel) => break,
        };

        match connected {
            Ok((stream, _)) => {
                info!(channel = %listener.channel, "Connected");
                if let Ended::Cancelled = pump(&mut listener, stream, &mut on_message).await {
                    backoff.cancel();
                }
            }
            Err(e) => warn!(channel = %listener.channel, error = %e, "Connection failed"),
        }

        if !pause(&mut backoff, &mut listener.cancel).await {
            break;
        }
    }
    info!(channel = %listener.channel, "Listener stopped");
}

async fn pump<S, F>(listener: &mut Listener, stream: S, on_message: &mut F) -> Ended
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
    F: FnMut(Value),
{
    let (mut write, mut read) = stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    listener.outbound.send_replace(Some(tx));

    let ended = loop {
        tokio::select! {
            () = cancelled(&mut listener.cancel) => {
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: "".into(),
                };
                if let Err(e) = write.send(Message::Close(Some(frame))).await {
                    debug!(channel = %listener.channel, error = %e, "Close failed");
                }
                break Ended::Cancelled;
            }
            Some(text) = rx.recv() => {
                if let Err(e) = write.send(Message::Text(text)).await {
                    warn!(channel = %listener.channel, error = %e, "Send failed");
                    break Ended::Dropped;
                }
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => deliver(&listener.channel, &text, on_message),
                Some(Ok(Message::Binary(data))) => {
                    deliver(&listener.channel, &String::from_utf8_lossy(&data), on_message);
                }
                Some(Ok(Message::Close(frame))) => {
                    log_close(&listener.channel, frame.as_ref());
                    break Ended::Dropped;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(channel = %listener.channel, error = %e, "Connection error");
                    break Ended::Dropped;
                }
                None => {
                    info!(channel = %listener.channel, "Connection closed");
                    break Ended::Dropped;
                }
            }
        }
    };

    listener.outbound.send_replace(None);
    ended
}

fn deliver<F: FnMut(Value)>(channel: &str, text: &str, on_message: &mut F) {
    match codec::decode(text) {
        Ok(value) => on_message(value),
        Err(e) => warn!(channel = %channel, error = %e, "Ignoring invalid frame"),
    }
}

fn log_close(channel: &str, frame: Option<&CloseFrame<'_>>) {
    let Some(frame) = frame else {
        info!(channel = %channel, "Closed by server");
        return;
    };
    let code = u16::from(frame.code);
    match CloseReason::from_reason(&frame.reason) {
        Some(reason) => warn!(channel = %channel, code, reason = %reason, "Rejected by server"),
        None => info!(channel = %channel, code, reason = %frame.reason, "Closed by server"),
    }
}

/// Wait out the next backoff delay. Returns `false` if the listener should
/// stop instead.
async fn pause(backoff: &mut Backoff, cancel: &mut watch::Receiver<bool>) -> bool {
    let Some(delay) = backoff.next_delay() else {
        return false;
    };
    debug!(delay_ms = delay.as_millis() as u64, "Reconnecting");
    tokio::select! {
        () = tokio::time::sleep(delay) => true,
        () = cancelled(cancel) => {
            backoff.cancel();
            false
        }
    }
}

/// Resolves once cancellation is requested or the handle is dropped.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[test]
    fn test_urls() {
        let channels = ServerChannels::new("ws://localhost:8080/");
        assert_eq!(channels.url("chat"), "ws://localhost:8080/ServerChannel/chat");

        let channels = channels.with_prefix("rt");
        assert_eq!(channels.url("chat"), "ws://localhost:8080/rt/chat");
    }

    #[tokio::test]
    async fn test_unknown_shared_channel() {
        let channels =
            ServerChannels::new("ws://127.0.0.1:9").with_shared([SharedChannelDef::new("news")]);

        assert!(matches!(
            channels.shared("prices", ListenOptions::new(""), |_| {}),
            Err(ClientError::UnknownSharedChannel(name)) if name == "prices"
        ));

        let client = channels
            .shared("news", ListenOptions::new("ignored"), |_| {})
            .unwrap();
        assert_eq!(client.channel(), "news");
        client.cancel();
        client.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_follows_backoff() {
        let (_tx, mut cancel) = watch::channel(false);
        let mut backoff = Backoff::new(Duration::from_millis(1000));

        let start = Instant::now();
        assert!(pause(&mut backoff, &mut cancel).await);
        assert_eq!(start.elapsed(), Duration::from_millis(1000));

        let start = Instant::now();
        assert!(pause(&mut backoff, &mut cancel).await);
        assert_eq!(start.elapsed(), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_interrupted_by_cancel() {
        let (tx, mut cancel) = watch::channel(false);
        let mut backoff = Backoff::new(Duration::from_secs(60));

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            tx.send_replace(true);
        });

        let start = Instant::now();
        assert!(!pause(&mut backoff, &mut cancel).await);
        assert!(start.elapsed() < Duration::from_secs(60));
        assert!(backoff.is_cancelled());
    }
}
