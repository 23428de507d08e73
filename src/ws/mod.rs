pub mod handlers;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{
    sink::SinkExt,
    stream::{SplitSink, StreamExt},
};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::notifier::{recv_or_pending, RoomSubscription, SubscriptionGuard};
use crate::protocol::{ClientEnvelope, ServerMessage, PROTOCOL_VERSION};
use crate::state::AppState;
use crate::types::{ForwardedAction, Room, RoomId};

/// The room feed a connection is currently subscribed to
#[derive(Default)]
pub struct ConnectionFeed {
    pub room_id: Option<RoomId>,
    updates: Option<broadcast::Receiver<Room>>,
    host_requests: Option<broadcast::Receiver<ForwardedAction>>,
    _guard: Option<SubscriptionGuard>,
}

impl ConnectionFeed {
    /// Replace the current subscription (dropping the old one)
    pub fn attach(&mut self, subscription: RoomSubscription) {
        let RoomSubscription {
            room_id,
            updates,
            host_requests,
            guard,
        } = subscription;
        *self = Self {
            room_id: Some(room_id),
            updates: Some(updates),
            host_requests,
            _guard: Some(guard),
        };
    }

    pub fn detach(&mut self) {
        *self = Self::default();
    }

    pub fn is_host_feed(&self) -> bool {
        self.host_requests.is_some()
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    tracing::info!("WebSocket connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_message(sender: &mut SplitSink<WebSocket, Message>, msg: &ServerMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            tracing::error!("Failed to serialize server message: {}", e);
            true
        }
    }
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let welcome = ServerMessage::Welcome {
        protocol: PROTOCOL_VERSION.to_string(),
        server_now: chrono::Utc::now().to_rfc3339(),
    };
    if !send_message(&mut sender, &welcome).await {
        tracing::error!("Failed to send welcome message");
        return;
    }

    let mut feed = ConnectionFeed::default();

    loop {
        tokio::select! {
            // Committed room changes
            update = recv_or_pending(&mut feed.updates) => {
                let msg = match update {
                    Ok(room) => ServerMessage::UpdateState { room },
                    Err(RecvError::Lagged(skipped)) => {
                        // Snapshots are full state, so the latest one replaces everything missed
                        let room_id = feed.room_id.clone().unwrap_or_default();
                        tracing::warn!(room_id = %room_id, skipped, "Subscriber lagged, re-fetching room");
                        match state.get_room(&room_id).await {
                            Ok(room) => ServerMessage::UpdateState { room },
                            Err(_) => {
                                feed.detach();
                                ServerMessage::RoomClosed { room_id }
                            }
                        }
                    }
                    Err(RecvError::Closed) => {
                        let room_id = feed.room_id.clone().unwrap_or_default();
                        feed.detach();
                        ServerMessage::RoomClosed { room_id }
                    }
                };
                if !send_message(&mut sender, &msg).await {
                    break;
                }
            }

            // Actions forwarded to this connection because it belongs to the host
            request = recv_or_pending(&mut feed.host_requests) => {
                match request {
                    Ok(forwarded) => {
                        if !send_message(&mut sender, &ServerMessage::from(forwarded)).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Host connection lagged, forwarded actions dropped");
                    }
                    Err(RecvError::Closed) => {
                        feed.host_requests = None;
                    }
                }
            }

            // Handle client messages
            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!("Received message: {}", text);

                        let response = match serde_json::from_str::<ClientEnvelope>(&text) {
                            Ok(envelope) => handlers::handle_message(envelope, &state, &mut feed).await,
                            Err(e) => {
                                tracing::error!("Failed to parse client message: {}", e);
                                ServerMessage::Error {
                                    req: None,
                                    code: "PARSE_ERROR".to_string(),
                                    msg: format!("Invalid message format: {}", e),
                                }
                            }
                        };
                        if !send_message(&mut sender, &response).await {
                            tracing::error!("Failed to send response");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("WebSocket closed");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    tracing::info!(room_id = ?feed.room_id, "WebSocket connection closed");
}
