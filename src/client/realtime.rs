use futures_util::StreamExt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::core::websocket::parse_push_payload;
use crate::core::{ConnectionState, Invalidation, ReconnectConfig, SessionContext, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Subscription to the bridge's push channel.
///
/// Opening spawns one background task that owns the socket. Every inbound
/// frame becomes an [`Invalidation`]; malformed frames are logged and dropped.
/// After [`close`](Self::close) (or drop) the socket is released and no
/// further invalidations are delivered.
pub struct RealtimeChannel {
    state_tx: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
    invalidations: mpsc::UnboundedReceiver<Invalidation>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    closed: bool,
}

/// Producer side of a channel created with [`RealtimeChannel::manual`]
#[derive(Clone)]
pub struct RealtimeFeed {
    state_tx: Arc<watch::Sender<ConnectionState>>,
    events_tx: mpsc::UnboundedSender<Invalidation>,
}

impl RealtimeFeed {
    pub fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    /// Returns false once the channel has been closed
    pub fn invalidate(&self, signal: Invalidation) -> bool {
        self.events_tx.send(signal).is_ok()
    }
}

impl RealtimeChannel {
    /// Connect to the session's push endpoint
    pub fn open(context: &SessionContext, reconnect: ReconnectConfig) -> Self {
        Self::open_url(context.realtime_endpoint(), reconnect)
    }

    pub fn open_url(endpoint: Url, reconnect: ReconnectConfig) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let state_tx = Arc::new(state_tx);
        let (events_tx, invalidations) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(run_channel(
            endpoint,
            reconnect,
            state_tx.clone(),
            events_tx,
            shutdown_rx,
        ));

        RealtimeChannel {
            state_tx,
            state_rx,
            invalidations,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
            closed: false,
        }
    }

    /// A channel driven by the returned feed instead of a socket
    pub fn manual() -> (RealtimeFeed, Self) {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let state_tx = Arc::new(state_tx);
        let (events_tx, invalidations) = mpsc::unbounded_channel();
        let feed = RealtimeFeed {
            state_tx: state_tx.clone(),
            events_tx,
        };
        let channel = RealtimeChannel {
            state_tx,
            state_rx,
            invalidations,
            shutdown_tx: None,
            task: None,
            closed: false,
        };
        (feed, channel)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Next invalidation, or `None` once the channel is closed for good
    pub async fn next_invalidation(&mut self) -> Option<Invalidation> {
        if self.closed {
            return None;
        }
        self.invalidations.recv().await
    }

    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.invalidations.close();

        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(mut task) = self.task.take() {
            // Give the task a moment to send a close frame
            if tokio::time::timeout(Duration::from_secs(2), &mut task)
                .await
                .is_err()
            {
                tracing::warn!("Realtime channel did not shut down in time, aborting");
                task.abort();
            }
        }

        // Drain anything that raced with the close
        while self.invalidations.try_recv().is_ok() {}
        self.state_tx.send_replace(ConnectionState::Closed);
        tracing::debug!("Realtime channel closed");
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// Endpoint without the token query, for logs
fn redacted(endpoint: &Url) -> String {
    let mut shown = endpoint.clone();
    shown.set_query(None);
    shown.to_string()
}

fn jitter() -> Duration {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.subsec_millis())
        .unwrap_or(0);
    Duration::from_millis(millis as u64 % 1000)
}

async fn run_channel(
    endpoint: Url,
    reconnect: ReconnectConfig,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    events_tx: mpsc::UnboundedSender<Invalidation>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let shown = redacted(&endpoint);
    let mut attempt = 0u32;

    loop {
        state_tx.send_replace(ConnectionState::Connecting);

        let connected = tokio::select! {
            _ = &mut shutdown_rx => break,
            result = connect_async(endpoint.as_str()) => result,
        };

        match connected {
            Ok((mut ws, _)) => {
                tracing::info!("Realtime channel connected to {}", shown);
                state_tx.send_replace(ConnectionState::Open);
                attempt = 0;

                let shutdown_requested = pump(&mut ws, &events_tx, &mut shutdown_rx).await;
                state_tx.send_replace(ConnectionState::Closed);
                if shutdown_requested {
                    let _ = ws.close(None).await;
                    break;
                }
            }
            Err(e) => {
                let err = TransportError::Connect(e.to_string());
                tracing::warn!("{} ({})", err, shown);
                state_tx.send_replace(ConnectionState::Closed);
            }
        }

        if !reconnect.enabled {
            tracing::info!("Realtime channel closed, reconnect disabled");
            break;
        }
        if attempt >= reconnect.max_attempts {
            tracing::error!(
                "Realtime channel gave up after {} reconnect attempts",
                reconnect.max_attempts
            );
            break;
        }

        let delay = reconnect.delay_for(attempt) + jitter();
        attempt += 1;
        tracing::warn!(
            "Reconnecting realtime channel in {:.1}s (attempt {}/{})",
            delay.as_secs_f64(),
            attempt,
            reconnect.max_attempts
        );

        tokio::select! {
            _ = &mut shutdown_rx => break,
            _ = sleep(delay) => {}
        }
    }

    state_tx.send_replace(ConnectionState::Closed);
}

/// Forward frames until the socket ends. Returns true when the owner asked
/// for shutdown (or went away), false when the connection dropped.
async fn pump(
    ws: &mut WsStream,
    events_tx: &mpsc::UnboundedSender<Invalidation>,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> bool {
    loop {
        tokio::select! {
            _ = &mut *shutdown_rx => return true,
            msg = ws.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => {
                            tracing::warn!("Dropping non-UTF-8 push payload");
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("Realtime channel closed by the bridge");
                        return false;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::warn!("{}", TransportError::Dropped(e.to_string()));
                        return false;
                    }
                };

                match parse_push_payload(&text) {
                    Ok(signal) => {
                        tracing::trace!("Push invalidation: {:?}", signal);
                        if events_tx.send(signal).is_err() {
                            return true;
                        }
                    }
                    Err(e) => tracing::warn!("Dropping push payload: {}", e),
                }
            }
        }
    }
}
