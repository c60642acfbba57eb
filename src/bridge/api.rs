//! Local HTTP/WebSocket front-end over a running bridge.
//!
//! | Route | Answer |
//! |-------|--------|
//! | `GET /status` | [`BridgeStatus`] snapshot |
//! | `GET /esp_wifi` | pairing view |
//! | `GET /messages?limit=N` | `{"messages": [...]}`, newest `N` (default 100) |
//! | `POST /send` | `{"text": "..."}` sent as an operator line |
//! | `GET /ws` | pushes new log entries, or a heartbeat, every 500 ms |
//!
//! `/send` answers 503 while the link is down and 400 for a line the radio
//! cannot carry.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{BridgeContext, StatusSource, DEFAULT_HISTORY};
use crate::error::LinkError;
use crate::state::{BridgeStatus, PairingStatus};

/// WebSocket push period.
const WS_TICK: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub(crate) struct ApiState {
    ctx: BridgeContext,
    status: StatusSource,
    stop: watch::Receiver<bool>,
}

impl ApiState {
    pub(crate) fn new(ctx: BridgeContext, status: StatusSource, stop: watch::Receiver<bool>) -> Self {
        Self { ctx, status, stop }
    }
}

/// Bind before any bridge task starts so a busy port fails `Bridge::start` cleanly.
pub(crate) fn bind(addr: &str) -> std::io::Result<TcpListener> {
    let listener = std::net::TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    TcpListener::from_std(listener)
}

pub(crate) fn router(state: ApiState) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/esp_wifi", get(esp_wifi))
        .route("/messages", get(messages))
        .route("/send", post(send))
        .route("/ws", get(ws))
        .with_state(state)
}

/// Serve until the stop flag flips. Must be called inside a tokio runtime.
pub(crate) fn serve(listener: TcpListener, state: ApiState) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
    let local = listener.local_addr()?;
    let mut stop = state.stop.clone();
    info!("HTTP API listening on {}", local);
    let task = tokio::spawn(async move {
        let shutdown = async move {
            let _ = stop.changed().await;
        };
        if let Err(e) = axum::serve(listener, router(state))
            .with_graceful_shutdown(shutdown)
            .await
        {
            warn!("HTTP API stopped: {}", e);
        }
        debug!("HTTP API task finished");
    });
    Ok((local, task))
}

async fn status(State(api): State<ApiState>) -> Json<BridgeStatus> {
    Json(api.status.status())
}

async fn esp_wifi(State(api): State<ApiState>) -> Json<PairingStatus> {
    Json(api.ctx.shared.pairing())
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn messages(
    State(api): State<ApiState>,
    Query(query): Query<HistoryQuery>,
) -> Json<serde_json::Value> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY);
    Json(json!({ "messages": api.ctx.shared.history(limit) }))
}

#[derive(Debug, Deserialize)]
struct SendRequest {
    text: String,
}

async fn send(State(api): State<ApiState>, Json(req): Json<SendRequest>) -> Response {
    let text = req.text.trim().to_string();
    match api.ctx.send_text(&text).await {
        Ok(()) => {
            info!("Operator TX: {}", text);
            Json(json!({ "status": "sent", "text": text })).into_response()
        }
        Err(e) => {
            let code = match e {
                LinkError::NotConnected => StatusCode::SERVICE_UNAVAILABLE,
                LinkError::PayloadTooLarge { .. } | LinkError::EmbeddedNewline => {
                    StatusCode::BAD_REQUEST
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            warn!("Operator TX failed: {}", e);
            (code, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}

async fn ws(State(api): State<ApiState>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| push_messages(socket, api))
}

/// First push carries whatever the log still holds.
async fn push_messages(mut socket: WebSocket, mut api: ApiState) {
    debug!("WebSocket client connected");
    let mut cursor = 0u64;
    let mut ticker = tokio::time::interval(WS_TICK);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let (next, fresh) = api.ctx.shared.messages_since(cursor);
                cursor = next;
                let connected = api.ctx.transport.is_connected();
                let event = if fresh.is_empty() {
                    json!({ "event": "heartbeat", "connected": connected })
                } else {
                    json!({ "event": "messages", "connected": connected, "messages": fresh })
                };
                if socket.send(Message::Text(event.to_string())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            _ = api.stop.changed() => break,
        }
    }
    debug!("WebSocket client disconnected");
}
