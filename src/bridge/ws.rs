//! WebSocket endpoint: one peer per connection.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::peer::PeerHandle;
use super::protocol::{decode_client_message, ServerMessage};
use crate::server::AppState;

/// `GET /ws` upgrade handler.
pub async fn ws_handler(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let peer_id = Uuid::new_v4().to_string();
    info!(%peer_id, "client connected");

    let (mut sender, mut receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerMessage>();

    let handle = PeerHandle::spawn(
        peer_id.clone(),
        Arc::clone(&state.factory),
        out_tx.clone(),
        state.peer_settings,
        state.registry.clone(),
    )
    .await;

    let send_task = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(err) => {
                    warn!(%err, "failed to serialize server message");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let reason = loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => match decode_client_message(text.as_str()) {
                Ok(message) => {
                    if !handle.send(message) {
                        break "peer stopped".to_owned();
                    }
                }
                Err(error) => {
                    debug!(%peer_id, %error, "rejecting client frame");
                    if out_tx.send(ServerMessage::error(error)).is_err() {
                        break "outbound closed".to_owned();
                    }
                }
            },
            Some(Ok(Message::Close(_))) | None => break "closed".to_owned(),
            Some(Ok(_)) => {}
            Some(Err(err)) => break format!("error: {err}"),
        }
    };

    info!(%peer_id, %reason, "client disconnected");
    handle.disconnect(reason);
    drop(out_tx);
    send_task.abort();
}
