//! WebSocket message dispatch
//!
//! Requests are answered with a reply carrying the request id. Host
//! authorization for `Execute` is checked by the store itself.

use crate::error::RoomError;
use crate::protocol::{ClientEnvelope, ClientMessage, ServerMessage};
use crate::state::AppState;
use crate::types::{normalize_room_code, Room};
use std::sync::Arc;

use super::ConnectionFeed;

fn room_reply(req: u64, result: Result<Room, RoomError>) -> ServerMessage {
    match result {
        Ok(room) => ServerMessage::Room { req, room },
        Err(e) => ServerMessage::error(Some(req), &e),
    }
}

fn ack_reply<T>(req: u64, result: Result<T, RoomError>) -> ServerMessage {
    match result {
        Ok(_) => ServerMessage::Ack { req },
        Err(e) => ServerMessage::error(Some(req), &e),
    }
}

/// Room codes are matched the same way as on the HTTP API
fn normalize_room(msg: ClientMessage) -> Result<ClientMessage, RoomError> {
    Ok(match msg {
        ClientMessage::GetRoom { room_id } => ClientMessage::GetRoom {
            room_id: normalize_room_code(&room_id)?,
        },
        ClientMessage::JoinRoom { room_id } => ClientMessage::JoinRoom {
            room_id: normalize_room_code(&room_id)?,
        },
        ClientMessage::LeaveRoom { room_id } => ClientMessage::LeaveRoom {
            room_id: normalize_room_code(&room_id)?,
        },
        ClientMessage::Execute {
            room_id,
            participant_id,
            action,
        } => ClientMessage::Execute {
            room_id: normalize_room_code(&room_id)?,
            participant_id,
            action,
        },
        ClientMessage::Forward {
            room_id,
            participant_id,
            action,
        } => ClientMessage::Forward {
            room_id: normalize_room_code(&room_id)?,
            participant_id,
            action,
        },
        ClientMessage::Subscribe {
            room_id,
            participant_id,
        } => ClientMessage::Subscribe {
            room_id: normalize_room_code(&room_id)?,
            participant_id,
        },
        other @ (ClientMessage::CreateRoom | ClientMessage::Unsubscribe) => other,
    })
}

/// Handle one client request and return the reply
pub async fn handle_message(
    envelope: ClientEnvelope,
    state: &Arc<AppState>,
    feed: &mut ConnectionFeed,
) -> ServerMessage {
    let ClientEnvelope { req, msg } = envelope;
    let msg = match normalize_room(msg) {
        Ok(msg) => msg,
        Err(e) => return ServerMessage::error(Some(req), &e),
    };

    match msg {
        ClientMessage::CreateRoom => room_reply(req, state.create_room().await),

        ClientMessage::GetRoom { room_id } => room_reply(req, state.get_room(&room_id).await),

        ClientMessage::JoinRoom { room_id } => {
            tracing::info!(room_id = %room_id, "Join request");
            room_reply(req, state.join_room(&room_id).await)
        }

        ClientMessage::LeaveRoom { room_id } => {
            tracing::info!(room_id = %room_id, "Leave request");
            room_reply(req, state.leave_room(&room_id).await)
        }

        ClientMessage::Execute {
            room_id,
            participant_id,
            action,
        } => ack_reply(
            req,
            state.apply_action(&room_id, &participant_id, action).await,
        ),

        ClientMessage::Forward {
            room_id,
            participant_id,
            action,
        } => ack_reply(
            req,
            state
                .forward_action(&room_id, &participant_id, action)
                .await,
        ),

        ClientMessage::Subscribe {
            room_id,
            participant_id,
        } => match state.subscribe(&room_id, &participant_id).await {
            Ok(subscription) => {
                feed.attach(subscription);
                tracing::info!(
                    room_id = %room_id,
                    host = feed.is_host_feed(),
                    "Connection subscribed"
                );
                ServerMessage::Ack { req }
            }
            Err(e) => ServerMessage::error(Some(req), &e),
        },

        ClientMessage::Unsubscribe => {
            feed.detach();
            ServerMessage::Ack { req }
        }
    }
}
