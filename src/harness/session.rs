//! One simulated observer
//!
//! Each [`SessionHandle`] owns a background task that keeps a WebSocket
//! session to the aggregator alive:
//! - Fixed-delay reconnection with an attempt budget
//! - Heartbeats on request from the pool's shared ticker
//! - Explicit close that never reconnects

use std::sync::Arc;
use std::time::{Duration, Instant};

use backoff::backoff::{Backoff, Constant};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message as WsMessage},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::config::HarnessSettings;
use crate::error::{Error, Result};
use crate::protocol::{decode, encode, ClientMessage, ServerMessage};

// ─────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────

/// Per-session connection settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket URL of the aggregator
    pub url: String,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// Reconnection attempts after a failure before giving up
    pub reconnect_attempts: u32,

    /// Fixed delay between reconnection attempts
    pub reconnect_delay: Duration,
}

impl From<&HarnessSettings> for SessionConfig {
    fn from(settings: &HarnessSettings) -> Self {
        Self {
            url: settings.url.clone(),
            connect_timeout: settings.connect_timeout(),
            reconnect_attempts: settings.reconnect_attempts,
            reconnect_delay: settings.reconnect_delay(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig::from(&HarnessSettings::default())
    }
}

// ─────────────────────────────────────────────────────────────────
// Session State
// ─────────────────────────────────────────────────────────────────

/// Why a session stopped for good
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Closed by the pool
    Requested,
    /// Reconnection budget used up
    RetriesExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// First connection attempt in flight
    Connecting,
    Connected,
    /// Connection lost, deciding whether to retry
    Disconnected,
    /// Waiting for or performing retry `attempt`
    Reconnecting { attempt: u32 },
    /// Terminal
    Closed(CloseReason),
}

impl SessionState {
    pub fn is_closed(&self) -> bool {
        matches!(self, SessionState::Closed(_))
    }
}

/// Last values observed from the aggregator
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub state: SessionState,
    pub ordinal: Option<u64>,
    pub last_count: Option<u64>,
    pub last_threshold: Option<u64>,
    pub last_heartbeat_ack: Option<Instant>,
    /// Successful connections, including reconnects
    pub connections: u32,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            state: SessionState::Connecting,
            ordinal: None,
            last_count: None,
            last_threshold: None,
            last_heartbeat_ack: None,
            connections: 0,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Session Handle
// ─────────────────────────────────────────────────────────────────

pub struct SessionHandle {
    id: u64,
    status: Arc<RwLock<SessionStatus>>,
    heartbeat_tx: mpsc::Sender<()>,
    close: CancellationToken,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Start connecting in the background
    pub fn spawn(id: u64, config: SessionConfig) -> Result<Self> {
        let url = Url::parse(&config.url)
            .map_err(|e| Error::connection_failed(config.url.clone(), format!("invalid URL: {}", e)))?;

        let status = Arc::new(RwLock::new(SessionStatus::default()));
        let (heartbeat_tx, heartbeat_rx) = mpsc::channel(1);
        let close = CancellationToken::new();

        let task = tokio::spawn(run_session(
            id,
            url,
            config,
            Arc::clone(&status),
            heartbeat_rx,
            close.clone(),
        ));

        Ok(Self {
            id,
            status,
            heartbeat_tx,
            close,
            task,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.status.read().state
    }

    pub fn status(&self) -> SessionStatus {
        self.status.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Queue a heartbeat; skipped unless connected or if one is already queued
    pub fn heartbeat(&self) -> bool {
        self.is_connected() && self.heartbeat_tx.try_send(()).is_ok()
    }

    /// Close for good; idempotent
    pub fn close(&self) {
        self.close.cancel();
    }

    /// Whether the background task has exited
    #[cfg(test)]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.close.cancel();
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────
// Session Loop
// ─────────────────────────────────────────────────────────────────

/// How a live connection ended
enum ConnectionEnd {
    CloseRequested,
    Lost(Error),
}

async fn run_session(
    id: u64,
    url: Url,
    config: SessionConfig,
    status: Arc<RwLock<SessionStatus>>,
    mut heartbeat_rx: mpsc::Receiver<()>,
    close: CancellationToken,
) {
    let mut backoff = Constant::new(config.reconnect_delay);
    let mut failures: u32 = 0;

    loop {
        if close.is_cancelled() {
            break;
        }

        let attempt = tokio::select! {
            result = tokio::time::timeout(config.connect_timeout, connect_async(url.as_str())) => result,
            _ = close.cancelled() => break,
        };

        let failure = match attempt {
            Ok(Ok((ws_stream, _response))) => {
                failures = 0;
                backoff.reset();
                {
                    let mut s = status.write();
                    s.state = SessionState::Connected;
                    s.connections += 1;
                }
                trace!(session = id, "Session connected");

                let (write, read) = ws_stream.split();
                match handle_connection(id, &status, &mut heartbeat_rx, &close, write, read).await {
                    ConnectionEnd::CloseRequested => break,
                    ConnectionEnd::Lost(reason) => reason,
                }
            }
            Ok(Err(e)) => Error::connection_failed(url.as_str(), e.to_string()),
            Err(_) => Error::ConnectionTimeout {
                url: url.to_string(),
                timeout_ms: config.connect_timeout.as_millis() as u64,
            },
        };

        status.write().state = SessionState::Disconnected;
        failures += 1;
        if !failure.is_retryable() || failures > config.reconnect_attempts {
            warn!(
                session = id,
                attempts = failures - 1,
                error = %failure.format_for_log(),
                "Giving up on session"
            );
            status.write().state = SessionState::Closed(CloseReason::RetriesExhausted);
            return;
        }

        debug!(session = id, attempt = failures, error = %failure.format_for_log(), "Session will reconnect");
        status.write().state = SessionState::Reconnecting { attempt: failures };

        let delay = backoff.next_backoff().unwrap_or(config.reconnect_delay);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = close.cancelled() => break,
        }
    }

    status.write().state = SessionState::Closed(CloseReason::Requested);
    trace!(session = id, "Session closed");
}

/// Drive one live connection until it ends
async fn handle_connection<S, R>(
    id: u64,
    status: &Arc<RwLock<SessionStatus>>,
    heartbeat_rx: &mut mpsc::Receiver<()>,
    close: &CancellationToken,
    mut write: S,
    mut read: R,
) -> ConnectionEnd
where
    S: SinkExt<WsMessage, Error = WsError> + Unpin,
    R: StreamExt<Item = std::result::Result<WsMessage, WsError>> + Unpin,
{
    if let Err(e) = send_message(&mut write, &ClientMessage::Heartbeat).await {
        return ConnectionEnd::Lost(e);
    }

    loop {
        tokio::select! {
            _ = close.cancelled() => {
                let _ = write.send(WsMessage::Close(None)).await;
                return ConnectionEnd::CloseRequested;
            }

            Some(()) = heartbeat_rx.recv() => {
                if let Err(e) = send_message(&mut write, &ClientMessage::Heartbeat).await {
                    return ConnectionEnd::Lost(e);
                }
            }

            msg = read.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => handle_server_frame(id, text.as_bytes(), status),
                Some(Ok(WsMessage::Binary(data))) => handle_server_frame(id, &data, status),
                Some(Ok(WsMessage::Ping(data))) => {
                    if let Err(e) = write.send(WsMessage::Pong(data)).await {
                        return ConnectionEnd::Lost(e.into());
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    return ConnectionEnd::Lost(Error::Connection(format!("server closed: {:?}", frame)));
                }
                Some(Err(e)) => return ConnectionEnd::Lost(e.into()),
                None => return ConnectionEnd::Lost(Error::Connection("stream ended".to_string())),
                _ => {}
            },
        }
    }
}

fn handle_server_frame(id: u64, payload: &[u8], status: &Arc<RwLock<SessionStatus>>) {
    let message = match decode::<ServerMessage>(payload) {
        Ok(message) => message,
        Err(e) => {
            debug!(session = id, error = %e, "Ignoring malformed server frame");
            return;
        }
    };

    trace!(session = id, event = message.event_name(), "Server frame");
    let mut s = status.write();
    match message {
        ServerMessage::Welcome { ordinal, count } => {
            s.ordinal = Some(ordinal);
            s.last_count = Some(count);
            if ordinal % 100 == 0 {
                info!(session = id, ordinal, "Observer welcomed");
            }
        }
        ServerMessage::Update { count, threshold } => {
            s.last_count = Some(count);
            s.last_threshold = Some(threshold);
        }
        ServerMessage::HeartbeatAck => {
            s.last_heartbeat_ack = Some(Instant::now());
        }
    }
}

async fn send_message<S>(write: &mut S, message: &ClientMessage) -> Result<()>
where
    S: SinkExt<WsMessage, Error = WsError> + Unpin,
{
    let text = encode(message)?;
    write.send(WsMessage::Text(text)).await?;
    Ok(())
}
