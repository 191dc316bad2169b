//! The `/ws` upgrade handler: authenticates per §6, stands up a session
//! via [`Coordinator::create_session`], then runs the reader/writer pair
//! that make up one session's `ControlChannel` (§4.5, §5).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum_extra::extract::CookieJar;
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::ids::SessionId;
use crate::protocol::{InboundEvent, OutboundEvent};
use crate::state::AppState;
use crate::web::auth::{extract_credential, WsAuthParams};

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    cookies: CookieJar,
    headers: HeaderMap,
    Query(params): Query<WsAuthParams>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, cookies, headers, params, addr))
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    cookies: CookieJar,
    headers: HeaderMap,
    params: WsAuthParams,
    addr: SocketAddr,
) {
    let Some(credential) = extract_credential(&state.config, &cookies, &headers, &params) else {
        reject(socket, "invalid_password").await;
        return;
    };
    let Some(role) = state.coordinator.authenticate_password(&credential) else {
        reject(socket, "invalid_password").await;
        return;
    };

    match state.coordinator.create_session(role, addr.ip()).await {
        Ok((session, outbound_rx)) => {
            info!(session = %session.id, role = role.as_str(), remote = %addr.ip(), "session connected");
            run_session(socket, state, session.id, outbound_rx).await;
        }
        Err(AppError::Locked) => reject(socket, "locked").await,
        Err(AppError::Forbidden(_)) => reject(socket, "banned").await,
        Err(e) => {
            warn!(error = %e, "failed to create session");
            reject(socket, "error").await;
        }
    }
}

/// Send a single `system/disconnect` frame and close (§6 disconnect reasons).
async fn reject(mut socket: WebSocket, reason: &str) {
    let frame = OutboundEvent::SystemDisconnect { message: reason.to_string() };
    if let Ok(json) = serde_json::to_string(&frame) {
        let _ = socket.send(Message::Text(json)).await;
    }
    let _ = socket.close().await;
}

async fn run_session(
    socket: WebSocket,
    state: Arc<AppState>,
    session_id: SessionId,
    mut outbound_rx: tokio::sync::mpsc::Receiver<OutboundEvent>,
) {
    let (mut sender, mut receiver) = socket.split();
    let ping_period = Duration::from_secs(state.config.timers.ping_interval_secs.max(1));

    let writer = tokio::spawn(async move {
        let mut ping_timer = tokio::time::interval(ping_period);
        ping_timer.tick().await; // first tick fires immediately; skip it
        loop {
            tokio::select! {
                frame = outbound_rx.recv() => {
                    match frame {
                        Some(frame) => {
                            let json = match serde_json::to_string(&frame) {
                                Ok(j) => j,
                                Err(e) => { warn!(error = %e, "failed to serialize outbound frame"); continue }
                            };
                            if sender.send(Message::Text(json)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_timer.tick() => {
                    if sender.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match InboundEvent::parse(&text) {
                Ok(event) => state.coordinator.handle_event(session_id, event).await,
                Err(e) => debug!(session = %session_id, error = %e, "dropping malformed control frame"),
            },
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Binary(_)) => {}
            Err(e) => {
                debug!(session = %session_id, error = %e, "control channel read error");
                break;
            }
        }
    }

    writer.abort();
    state.coordinator.destroy_session(session_id).await;
    info!(session = %session_id, "session disconnected");
}
