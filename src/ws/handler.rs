//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::http::middleware::verify_jwt;
use crate::race::{RaceHandle, RaceView, Stage};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// JWT token for authentication
    pub token: String,
    /// Race to watch and send commands to
    pub race_id: String,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    // Verify JWT token before upgrading
    let claims = match verify_jwt(&query.token, &state.config.jwt_secret) {
        Ok(claims) => claims,
        Err(e) => {
            warn!(error = %e, "WebSocket auth failed");
            return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        }
    };

    let Some(handle) = state.registry.get(&query.race_id) else {
        return (StatusCode::NOT_FOUND, "Race not found").into_response();
    };

    info!(user_id = %claims.sub, race_id = %handle.id, "WebSocket upgrade for authenticated user");
    ws.on_upgrade(move |socket| handle_socket(socket, claims.sub, handle, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, user_id: Uuid, handle: RaceHandle, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    // Subscribe before the first snapshot so no update falls in between
    let mut views = handle.subscribe();

    let balance = match state.accounts.account(user_id).await {
        Ok(account) => account.map(|a| a.balance),
        Err(e) => {
            error!(user_id = %user_id, error = %e, "Failed to fetch account");
            None
        }
    };

    let welcome = ServerMsg::Welcome {
        user_id,
        race_id: handle.id.clone(),
        balance,
        server_time: unix_millis(),
    };
    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(user_id = %user_id, error = %e, "Failed to send welcome");
        return;
    }
    let current = handle.view();
    let already_final = is_final_view(&current);
    if send_msg(&mut ws_sink, &ServerMsg::race_update(current))
        .await
        .is_err()
    {
        return;
    }
    if already_final {
        // The final broadcast went out before we subscribed
        let _ = ws_sink.close().await;
        info!(user_id = %user_id, race_id = %handle.id, "Race already finished, closing stream");
        return;
    }

    let rate_limiter = ConnectionRateLimiter::new();

    loop {
        tokio::select! {
            view = views.recv() => match view {
                Ok(view) => {
                    let finished = is_final_view(&view);
                    if let Err(e) = send_msg(&mut ws_sink, &ServerMsg::race_update(view)).await {
                        debug!(user_id = %user_id, error = %e, "WebSocket send failed");
                        break;
                    }
                    if finished {
                        info!(user_id = %user_id, race_id = %handle.id, "Race finished, closing stream");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // Views are full snapshots, the next one catches the client up
                    warn!(user_id = %user_id, lagged_count = n, "Client lagged, skipping views");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = ws_stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let reply = if rate_limiter.check_message() {
                        match serde_json::from_str::<ClientMsg>(&text) {
                            Ok(msg) => handle_client_msg(&state, user_id, &handle.id, msg).await,
                            Err(e) => {
                                warn!(user_id = %user_id, error = %e, "Failed to parse client message");
                                ServerMsg::error("bad_message", e.to_string())
                            }
                        }
                    } else {
                        warn!(user_id = %user_id, "Rate limited client message");
                        ServerMsg::error("rate_limited", "Too many messages")
                    };
                    if send_msg(&mut ws_sink, &reply).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!(user_id = %user_id, "Client initiated close");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(user_id = %user_id, error = %e, "WebSocket error");
                    break;
                }
            },
        }
    }

    let _ = ws_sink.close().await;
    info!(user_id = %user_id, "WebSocket connection closed");
}

/// A finished race sends no further views
fn is_final_view(view: &RaceView) -> bool {
    view.stage == Stage::Finished
}

/// Run one client command against the watched race
pub async fn handle_client_msg(
    state: &AppState,
    user_id: Uuid,
    race_id: &str,
    msg: ClientMsg,
) -> ServerMsg {
    match msg {
        ClientMsg::Ping { t } => ServerMsg::Pong { t },
        ClientMsg::Join => match state.lobby.join(user_id, race_id).await {
            Ok(entry) => ServerMsg::CommandAccepted {
                command: "join".to_string(),
                message: format!("{} entered as #{}", entry.racer_name, entry.racer_index),
            },
            Err(e) => ServerMsg::lobby_error(&e),
        },
        ClientMsg::Bet {
            racer_index,
            amount,
        } => match state.lobby.bet(user_id, race_id, racer_index, amount).await {
            Ok(placed) => ServerMsg::CommandAccepted {
                command: "bet".to_string(),
                message: format!(
                    "{} on #{} {}, balance {}",
                    placed.amount, placed.racer_index, placed.racer_name, placed.balance
                ),
            },
            Err(e) => ServerMsg::lobby_error(&e),
        },
    }
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
