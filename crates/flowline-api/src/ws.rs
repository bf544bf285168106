// WebSocket endpoint for execution event streaming
//
// Protocol:
// - Client connects to /ws/executions with a bearer credential
// - Server sends: { "event": "CONNECTED", "connectionId": ... }
// - Client sends: { "action": "subscribe", "executionId": "..." }
// - Server sends: { "event": "ACK", "action": "subscribe", ... }
// - Server pushes execution events as they are emitted
// - Client sends: { "action": "unsubscribe", "executionId": "..." }

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tracing::debug;

use crate::auth::AuthContext;
use crate::hub::SubscriptionHub;

/// App state for streaming routes
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<SubscriptionHub>,
}

/// Create streaming routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/ws/executions", get(executions_websocket))
        .route("/ws/status", get(websocket_status))
        .with_state(state)
}

/// GET /ws/executions - WebSocket upgrade for event streaming
pub async fn executions_websocket(
    ws: WebSocketUpgrade,
    auth: AuthContext,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub, auth))
}

async fn handle_socket(socket: WebSocket, hub: Arc<SubscriptionHub>, auth: AuthContext) {
    let (session_id, mut outbound) = hub.connect(&auth);
    let (mut sink, mut stream) = socket.split();

    // Pump hub messages out to the socket. Dropping the receiver on
    // exit makes the hub's next send fail, which disconnects the
    // session server-side.
    let forward = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            if sink.send(Message::Text(message.to_string())).await.is_err() {
                break;
            }
        }
    });

    // Control message loop
    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<Value>(&text) {
                Ok(data) if data.is_object() => {
                    hub.handle_message(&session_id, data).await;
                }
                _ => {
                    debug!(session_id = %session_id, "Ignoring malformed control message");
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    hub.disconnect(&session_id);
    forward.abort();
}

/// GET /ws/status - Hub counters for monitoring
pub async fn websocket_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "connections": state.hub.session_count(),
        "subscriptions": state.hub.subscription_count(),
    }))
}
