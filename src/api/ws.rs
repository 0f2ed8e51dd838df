// =============================================================================
// WebSocket Handler - push-only price updates on `/ws/price`
// =============================================================================
//
// Each connection registers with the feed's broadcaster and forwards every
// `price_update` it receives. Nothing is sent on connect; clients only see
// prices streamed after they subscribed.
//
// The handler also:
//   - Responds to Ping frames with Pong frames.
//   - Ignores client text frames (clients may send keepalives).
//   - Unregisters the subscriber on disconnect.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::app_state::AppState;

pub async fn price_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_price_socket(socket, state))
}

async fn handle_price_socket(socket: WebSocket, state: Arc<AppState>) {
    let broadcaster = state.feed.broadcaster().clone();
    let (id, mut updates) = broadcaster.subscribe();
    info!(subscriber = %id, total = broadcaster.len(), "price WebSocket client connected");

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(update) = update else { break };
                match serde_json::to_string(&update) {
                    Ok(text) => {
                        if let Err(e) = sender.send(Message::Text(text)).await {
                            debug!(error = %e, "price push failed, disconnecting");
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to serialise price update"),
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sender.send(Message::Pong(data)).await {
                            debug!(error = %e, "failed to send Pong, disconnecting");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Text(text))) => debug!(msg = %text, "client text frame ignored"),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "price WebSocket receive error");
                        break;
                    }
                }
            }
        }
    }

    broadcaster.unsubscribe(&id);
    info!(subscriber = %id, total = broadcaster.len(), "price WebSocket client disconnected");
}
