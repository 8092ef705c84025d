//! HTTP and WebSocket surface of the aggregator

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::{decode, encode, parse_count, ClientMessage, ServerMessage};

use super::registry::{Admission, PresenceSnapshot, SessionRegistry};

/// Shared state accessible from handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    /// Cancelled when the server stops; live sessions close
    pub shutdown: CancellationToken,
}

/// Body of `GET /health`
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub count: u64,
    pub threshold: u64,
    pub testing_mode: bool,
    pub broadcasts: u64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/force-count/:count", get(force_count_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let snapshot = state.registry.snapshot();
    Json(HealthResponse {
        status: "ok",
        count: snapshot.count,
        threshold: snapshot.threshold,
        testing_mode: state.registry.testing_mode(),
        broadcasts: state.registry.coalescer().stats().broadcasts,
    })
}

/// GET /force-count/:count
async fn force_count_handler(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Response {
    if !state.registry.testing_mode() {
        return error_response(Error::permission_denied("force-count"));
    }

    let result = parse_count(&raw).and_then(|count| state.registry.force_set(count));
    match result {
        Ok(snapshot) => Json(json!({ "success": true, "count": snapshot.count })).into_response(),
        Err(e) => error_response(e),
    }
}

fn error_response(err: Error) -> Response {
    debug!(error = %err.format_for_log(), "Request rejected");
    let body = json!({
        "success": false,
        "code": err.code().as_str(),
        "error": err.to_string(),
    });
    (err.http_status(), Json(body)).into_response()
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.registry, state.shutdown))
}

// ─────────────────────────────────────────────────────────────────
// Session Lifecycle
// ─────────────────────────────────────────────────────────────────

/// Counts the session for exactly as long as it is alive
struct SessionGuard {
    registry: Arc<SessionRegistry>,
    admission: Admission,
}

impl SessionGuard {
    fn admit(registry: &Arc<SessionRegistry>) -> Self {
        let admission = registry.connect();
        Self {
            registry: Arc::clone(registry),
            admission,
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let remaining = self.registry.disconnect();
        trace!(ordinal = self.admission.ordinal, remaining, "Session released");
    }
}

type WsSink = SplitSink<WebSocket, Message>;

async fn handle_socket(
    socket: WebSocket,
    registry: Arc<SessionRegistry>,
    shutdown: CancellationToken,
) {
    // Subscribe first so the update triggered by our own connect is not missed
    let mut updates = registry.subscribe();
    let session = SessionGuard::admit(&registry);
    let ordinal = session.admission.ordinal;
    let (mut sink, mut stream) = socket.split();

    let welcome = ServerMessage::Welcome {
        ordinal,
        count: session.admission.count,
    };
    if let Err(e) = send_message(&mut sink, &welcome).await {
        debug!(ordinal, error = %e, "Failed to send welcome");
        return;
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }

            update = updates.recv() => match update {
                Ok(snapshot) => {
                    let snapshot = latest_snapshot(&mut updates, snapshot);
                    let message = ServerMessage::Update {
                        count: snapshot.count,
                        threshold: snapshot.threshold,
                    };
                    if let Err(e) = send_message(&mut sink, &message).await {
                        debug!(ordinal, error = %e, "Failed to send update");
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    trace!(ordinal, skipped, "Session skipped stale updates");
                }
                Err(RecvError::Closed) => break,
            },

            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = handle_client_frame(text.as_bytes(), &mut sink).await {
                        debug!(ordinal, error = %e, "Failed to answer client frame");
                        break;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    if let Err(e) = handle_client_frame(&data, &mut sink).await {
                        debug!(ordinal, error = %e, "Failed to answer client frame");
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                // Ping/pong is answered by the transport
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(ordinal, error = %e, "Session transport error");
                    break;
                }
            },
        }
    }

    drop(session);
}

/// Collapse queued updates to the newest one
fn latest_snapshot(
    updates: &mut broadcast::Receiver<PresenceSnapshot>,
    mut snapshot: PresenceSnapshot,
) -> PresenceSnapshot {
    loop {
        match updates.try_recv() {
            Ok(next) => snapshot = next,
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return snapshot,
        }
    }
}

/// Answer one inbound frame; malformed frames are logged and dropped
async fn handle_client_frame(payload: &[u8], sink: &mut WsSink) -> Result<()> {
    match decode::<ClientMessage>(payload) {
        Ok(message) => {
            trace!(event = message.event_name(), "Client frame");
            match message {
                ClientMessage::Heartbeat => send_message(sink, &ServerMessage::HeartbeatAck).await,
            }
        }
        Err(e) => {
            warn!(error = %e.format_for_log(), "Dropping malformed client frame");
            Ok(())
        }
    }
}

async fn send_message(sink: &mut WsSink, message: &ServerMessage) -> Result<()> {
    let text = encode(message)?;
    sink.send(Message::Text(text))
        .await
        .map_err(|e| Error::Connection(e.to_string()))
}
