use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use manda_db::User;

use crate::AppState;
use crate::auth::{TokenQuery, authenticate, bearer_token};
use crate::error::ApiError;

/// Live event feed. Authentication happens before the upgrade completes,
/// but a rejected client still gets a socket so it can read the close code.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Response {
    let auth = match bearer_token(&headers, &query) {
        Some(token) => authenticate(&state, &token).await,
        None => Err(ApiError::Unauthorized("Missing bearer token".into())),
    };

    ws.on_upgrade(move |socket| async move {
        match auth {
            Ok(user) => handle_socket(socket, state, user).await,
            Err(e) => reject(socket, e).await,
        }
    })
}

async fn reject(mut socket: WebSocket, reason: ApiError) {
    debug!(error = %reason, "Closing unauthenticated socket");
    let frame = CloseFrame {
        code: close_code::POLICY,
        reason: "Unauthorized".into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

async fn handle_socket(socket: WebSocket, state: AppState, user: User) {
    let fanout = state.worker.fanout();
    let mut subscription = fanout.register(&user.id).await;
    let conn_id = subscription.conn_id.clone();
    info!(conn_id = %conn_id, user_id = %user.id, "Client connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_conn = conn_id.clone();
    let mut writer = tokio::spawn(async move {
        while let Some(event) = subscription.events.recv().await {
            if let Err(e) = ws_tx.send(Message::Text(event.as_str().into())).await {
                debug!(conn_id = %writer_conn, error = %e, "Socket write failed");
                break;
            }
        }
    });

    let mut reader = tokio::spawn(async move {
        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Socket read failed");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    fanout.unregister(&conn_id).await;
    info!(conn_id = %conn_id, user_id = %user.id, "Client disconnected");
}
