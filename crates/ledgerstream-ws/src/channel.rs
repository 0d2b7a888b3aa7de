//! WebSocket push channel with reconnect and subscription replay.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use ledgerstream_core::error::{IngestError, TransportError};
use ledgerstream_core::policy::ReconnectPolicy;

use crate::replay::ReplayBook;
use crate::state::{ConnectionState, ConnectionStatus};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

/// Receives every inbound text frame from the connection task.
///
/// Called on the connection task itself, so implementations must not block.
pub trait InboundSink: Send + Sync + 'static {
    fn on_message(&self, text: &str);

    /// Called once when the channel stops for good (closed or gave up).
    fn on_closed(&self) {}
}

/// Configuration for the push channel.
#[derive(Debug, Clone)]
pub struct PushChannelConfig {
    /// Timeout for each WebSocket handshake.
    pub handshake_timeout: Duration,
    /// Delay policy between reconnect attempts.
    pub reconnect: ReconnectPolicy,
}

impl Default for PushChannelConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Command sent from callers to the background connection task.
enum PushCommand {
    Send {
        payload: String,
        tx: oneshot::Sender<Result<(), TransportError>>,
    },
    Close,
}

/// A single persistent connection shared by many subscriptions.
///
/// The background task owns the socket, forwards inbound frames to the
/// [`InboundSink`], and reconnects on failure. Subscribe payloads sent through
/// [`PushChannel::subscribe`] are replayed after each reconnect.
pub struct PushChannel {
    url: String,
    cmd_tx: mpsc::UnboundedSender<PushCommand>,
    replay: ReplayBook,
    status: watch::Receiver<ConnectionStatus>,
    task: Mutex<Option<JoinHandle<Result<(), TransportError>>>>,
}

impl PushChannel {
    /// Dial `url` and start the background task.
    ///
    /// Fails if the initial handshake fails; later failures are handled by
    /// the reconnect policy.
    pub async fn connect(
        url: impl Into<String>,
        config: PushChannelConfig,
        sink: Arc<dyn InboundSink>,
    ) -> Result<Self, TransportError> {
        let url = url.into();
        let (status_tx, status) = watch::channel(ConnectionStatus::new(&url));

        tracing::info!(url = %url, "connecting push channel");
        let ws = match dial(&url, config.handshake_timeout).await {
            Ok(ws) => ws,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "push channel connect failed");
                return Err(e);
            }
        };
        status_tx.send_modify(|s| s.state = ConnectionState::Connected);
        tracing::info!(url = %url, "push channel connected");

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<PushCommand>();
        let replay = ReplayBook::new();

        let task = tokio::spawn(push_task(
            url.clone(),
            ws,
            cmd_rx,
            sink,
            replay.clone(),
            status_tx,
            config,
        ));

        Ok(Self {
            url,
            cmd_tx,
            replay,
            status,
            task: Mutex::new(Some(task)),
        })
    }

    /// Write one JSON payload to the connection.
    pub async fn send(&self, payload: &Value) -> Result<(), TransportError> {
        self.send_text(serde_json::to_string(payload)?).await
    }

    /// Send a subscribe payload and remember it under `key` for replay.
    pub async fn subscribe(&self, key: &str, payload: &Value) -> Result<(), TransportError> {
        let text = serde_json::to_string(payload)?;
        self.send_text(text.clone()).await?;
        self.replay.remember(key, text);
        Ok(())
    }

    /// Forget the payload under `key`, then send `payload` if one is given.
    pub async fn unsubscribe(&self, key: &str, payload: Option<&Value>) -> Result<(), TransportError> {
        self.replay.forget(key);
        match payload {
            Some(p) => self.send(p).await,
            None => Ok(()),
        }
    }

    /// Current connection snapshot.
    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// Number of subscribe payloads that will be replayed on reconnect.
    pub fn remembered(&self) -> usize {
        self.replay.len()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Ask the task to close the connection and wait for it to finish.
    pub async fn close(&self) -> Result<(), TransportError> {
        let _ = self.cmd_tx.send(PushCommand::Close);
        self.closed().await
    }

    /// Wait for the background task to stop.
    ///
    /// Returns `RetriesExhausted` if the reconnect policy gave up.
    pub async fn closed(&self) -> Result<(), TransportError> {
        let task = self.task.lock().unwrap().take();
        match task {
            Some(handle) => handle
                .await
                .map_err(|e| TransportError::Other(format!("push task panicked: {e}")))?,
            None => Ok(()),
        }
    }

    async fn send_text(&self, payload: String) -> Result<(), TransportError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(PushCommand::Send { payload, tx })
            .map_err(|_| TransportError::Closed)?;
        rx.await.map_err(|_| TransportError::Closed)?
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(PushCommand::Close);
    }
}

async fn dial(url: &str, timeout: Duration) -> Result<WsStream, TransportError> {
    match time::timeout(timeout, tokio_tungstenite::connect_async(url)).await {
        Err(_) => Err(TransportError::Timeout {
            ms: timeout.as_millis() as u64,
        }),
        Ok(Err(e)) => Err(TransportError::Connect {
            url: url.to_string(),
            reason: e.to_string(),
        }),
        Ok(Ok((ws, _))) => Ok(ws),
    }
}

/// Why a connected session ended.
enum SessionEnd {
    /// Caller closed the channel (or dropped it).
    Closed,
    /// Read/write failure; reconnect.
    Failed(String),
}

/// Background task that owns the WebSocket connection.
async fn push_task(
    url: String,
    mut ws: WsStream,
    mut cmd_rx: mpsc::UnboundedReceiver<PushCommand>,
    sink: Arc<dyn InboundSink>,
    replay: ReplayBook,
    status: watch::Sender<ConnectionStatus>,
    config: PushChannelConfig,
) -> Result<(), TransportError> {
    let mut replay_on_start = false;

    loop {
        let (mut write, read) = ws.split();

        if replay_on_start {
            let payloads = replay.payloads();
            tracing::info!(url = %url, count = payloads.len(), "replaying subscriptions");
            for payload in payloads {
                if let Err(e) = write.send(Message::Text(payload.into())).await {
                    tracing::warn!(url = %url, error = %e, "resubscribe failed");
                }
            }
        }

        let end = run_session(write, read, &mut cmd_rx, sink.as_ref()).await;
        match end {
            SessionEnd::Closed => {
                status.send_modify(|s| s.state = ConnectionState::Disconnected);
                tracing::info!(url = %url, "push channel closed");
                sink.on_closed();
                return Ok(());
            }
            SessionEnd::Failed(reason) => {
                tracing::warn!(url = %url, error = %reason, "push channel disconnected");
                status.send_modify(|s| {
                    s.state = ConnectionState::Disconnected;
                    s.last_error = Some(reason);
                });
            }
        }

        let mut attempt = 0u32;
        ws = loop {
            attempt += 1;
            let Some(delay) = config.reconnect.next_delay(attempt) else {
                let attempts = attempt - 1;
                tracing::error!(url = %url, attempts, "push channel giving up");
                sink.on_closed();
                return Err(TransportError::RetriesExhausted { attempts });
            };

            tracing::info!(url = %url, attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
            if !wait_or_close(delay, &mut cmd_rx).await {
                tracing::info!(url = %url, "push channel closed while reconnecting");
                sink.on_closed();
                return Ok(());
            }

            status.send_modify(|s| s.state = ConnectionState::Connecting);
            match dial(&url, config.handshake_timeout).await {
                Ok(ws) => break ws,
                Err(e) => {
                    let err = IngestError::Connection(e);
                    tracing::warn!(url = %url, attempt, error = %err, "reconnect failed");
                    status.send_modify(|s| {
                        s.state = ConnectionState::Disconnected;
                        s.last_error = Some(err.to_string());
                    });
                }
            }
        };

        status.send_modify(|s| {
            s.state = ConnectionState::Connected;
            s.reconnects += 1;
        });
        tracing::info!(url = %url, "push channel reconnected");
        replay_on_start = true;
    }
}

/// Read/dispatch loop for one connected session.
async fn run_session(
    mut write: WsWrite,
    mut read: WsRead,
    cmd_rx: &mut mpsc::UnboundedReceiver<PushCommand>,
    sink: &dyn InboundSink,
) -> SessionEnd {
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    None | Some(PushCommand::Close) => {
                        let _ = write.send(Message::Close(None)).await;
                        return SessionEnd::Closed;
                    }
                    Some(PushCommand::Send { payload, tx }) => {
                        match write.send(Message::Text(payload.into())).await {
                            Ok(()) => {
                                let _ = tx.send(Ok(()));
                            }
                            Err(e) => {
                                let reason = e.to_string();
                                let _ = tx.send(Err(TransportError::WebSocket(reason.clone())));
                                return SessionEnd::Failed(reason);
                            }
                        }
                    }
                }
            }
            msg = read.next() => {
                match msg {
                    None => return SessionEnd::Failed("stream ended".into()),
                    Some(Err(e)) => return SessionEnd::Failed(e.to_string()),
                    Some(Ok(Message::Text(text))) => sink.on_message(text.as_str()),
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => sink.on_message(text),
                        Err(_) => tracing::debug!(len = data.len(), "ignoring non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) => return SessionEnd::Failed("closed by server".into()),
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

/// Sleep for `delay` while rejecting sends. Returns `false` if the caller
/// closed the channel in the meantime.
async fn wait_or_close(delay: Duration, cmd_rx: &mut mpsc::UnboundedReceiver<PushCommand>) -> bool {
    let sleep = time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            cmd = cmd_rx.recv() => match cmd {
                None | Some(PushCommand::Close) => return false,
                Some(PushCommand::Send { tx, .. }) => {
                    let _ = tx.send(Err(TransportError::WebSocket("not connected".into())));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    struct Collect {
        tx: mpsc::UnboundedSender<String>,
        closed: Arc<std::sync::atomic::AtomicBool>,
    }

    impl InboundSink for Collect {
        fn on_message(&self, text: &str) {
            let _ = self.tx.send(text.to_string());
        }

        fn on_closed(&self) {
            self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    fn collector() -> (Arc<Collect>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Collect {
                tx,
                closed: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            }),
            rx,
        )
    }

    fn fast_config(policy: ReconnectPolicy) -> PushChannelConfig {
        PushChannelConfig {
            handshake_timeout: Duration::from_secs(2),
            reconnect: policy,
        }
    }

    async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> String {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(t))) => return t.as_str().to_string(),
                Some(Ok(_)) => continue,
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
        time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("sink dropped")
    }

    #[tokio::test]
    async fn connect_refused_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (sink, _rx) = collector();
        let err = PushChannel::connect(format!("ws://{addr}"), PushChannelConfig::default(), sink)
            .await
            .err()
            .expect("connect should fail");
        assert!(matches!(err, TransportError::Connect { .. }), "got {err}");
    }

    #[tokio::test]
    async fn resumes_delivery_and_replays_after_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let subscribe = json!({"id": "ledger_subscribe", "command": "subscribe", "streams": ["ledger"]});
        let expected = subscribe.to_string();

        let server = tokio::spawn(async move {
            // First connection: wait for the subscribe, deliver two messages, drop.
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            assert_eq!(next_text(&mut ws).await, expected);
            ws.send(Message::Text("m1".into())).await.unwrap();
            ws.send(Message::Text("m2".into())).await.unwrap();
            drop(ws);

            // Second connection: the subscribe must be replayed before anything else.
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            assert_eq!(next_text(&mut ws).await, expected);
            ws.send(Message::Text("m3".into())).await.unwrap();
            ws
        });

        let (sink, mut rx) = collector();
        let channel = PushChannel::connect(
            format!("ws://{addr}"),
            fast_config(ReconnectPolicy::fixed(Duration::from_millis(50))),
            sink,
        )
        .await
        .unwrap();
        channel.subscribe("ledger_subscribe", &subscribe).await.unwrap();

        assert_eq!(recv(&mut rx).await, "m1");
        assert_eq!(recv(&mut rx).await, "m2");
        assert_eq!(recv(&mut rx).await, "m3");

        let status = channel.status();
        assert_eq!(status.reconnects, 1);
        assert_eq!(status.state, ConnectionState::Connected);
        assert!(status.last_error.is_some());

        let _server_ws = server.await.unwrap();
        channel.close().await.unwrap();
        assert_eq!(channel.status().state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn bounded_policy_surfaces_fatal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = accept_async(tcp).await.unwrap();
            // Drop both the socket and the listener so every reconnect is refused.
            drop(ws);
            drop(listener);
        });

        let (sink, _rx) = collector();
        let closed_flag = sink.closed.clone();
        let policy = ReconnectPolicy::fixed(Duration::from_millis(10)).with_max_retries(2);
        let channel = PushChannel::connect(format!("ws://{addr}"), fast_config(policy), sink)
            .await
            .unwrap();
        server.await.unwrap();

        let err = time::timeout(Duration::from_secs(5), channel.closed())
            .await
            .expect("channel should give up")
            .unwrap_err();
        assert!(matches!(err, TransportError::RetriesExhausted { attempts: 2 }), "got {err}");
        assert!(closed_flag.load(std::sync::atomic::Ordering::SeqCst));
        let status = channel.status();
        assert_eq!(status.state, ConnectionState::Disconnected);
        let last = status.last_error.unwrap_or_default();
        assert!(last.starts_with("Connection error"), "last error: {last}");
    }

    #[tokio::test]
    async fn unsubscribe_forgets_replay_payload() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            let first = next_text(&mut ws).await;
            let second = next_text(&mut ws).await;
            (first, second, ws)
        });

        let (sink, _rx) = collector();
        let channel = PushChannel::connect(format!("ws://{addr}"), PushChannelConfig::default(), sink)
            .await
            .unwrap();
        let sub = json!({"command": "subscribe", "accounts": ["rA"]});
        let unsub = json!({"command": "unsubscribe", "accounts": ["rA"]});
        channel.subscribe("accounts_subscribe", &sub).await.unwrap();
        assert_eq!(channel.remembered(), 1);
        channel.unsubscribe("accounts_subscribe", Some(&unsub)).await.unwrap();
        assert_eq!(channel.remembered(), 0);

        let (first, second, _ws) = server.await.unwrap();
        assert_eq!(first, sub.to_string());
        assert_eq!(second, unsub.to_string());
        channel.close().await.unwrap();
    }
}
