//! Live status push over WebSocket

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use tokio::sync::broadcast::error::RecvError;

use crate::ui::server::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Sends the current status, then every published snapshot
async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut rx = state.engine.subscribe();
    tracing::debug!("WebSocket client connected");

    let mut next = Ok(state.engine.status());
    loop {
        let status = match next {
            Ok(status) => status,
            Err(RecvError::Lagged(missed)) => {
                tracing::debug!("WebSocket client lagged by {} snapshots", missed);
                state.engine.status()
            }
            Err(RecvError::Closed) => break,
        };
        let text = match serde_json::to_string(&status) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Failed to serialize status: {}", e);
                break;
            }
        };
        if socket.send(Message::Text(text)).await.is_err() {
            break;
        }
        next = rx.recv().await;
    }
    tracing::debug!("WebSocket client disconnected");
}
