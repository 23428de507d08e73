use crate::error::RoomError;
use crate::types::*;
use serde::{Deserialize, Serialize};

/// Protocol version announced in `Welcome`
pub const PROTOCOL_VERSION: &str = "1.0";

/// A client request together with the id its reply will carry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientEnvelope {
    pub req: u64,
    #[serde(flatten)]
    pub msg: ClientMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ClientMessage {
    CreateRoom,
    /// Pure read, used for session recovery and polling
    GetRoom {
        room_id: RoomId,
    },
    JoinRoom {
        room_id: RoomId,
    },
    LeaveRoom {
        room_id: RoomId,
    },
    /// Host-only: run an action against the store
    Execute {
        room_id: RoomId,
        participant_id: ParticipantId,
        action: PlayerAction,
    },
    /// Guest: pass an action on to the host
    Forward {
        room_id: RoomId,
        participant_id: ParticipantId,
        action: PlayerAction,
    },
    /// Switch this connection's change feed to a room
    Subscribe {
        room_id: RoomId,
        participant_id: ParticipantId,
    },
    Unsubscribe,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        protocol: String,
        server_now: String,
    },
    /// Reply carrying a room snapshot
    Room {
        req: u64,
        room: Room,
    },
    /// Reply for requests without a payload
    Ack {
        req: u64,
    },
    /// Authoritative full state of the subscribed room
    UpdateState {
        room: Room,
    },
    /// Sent to the host's connection only
    ForwardedAction {
        room_id: RoomId,
        from: ParticipantId,
        action: PlayerAction,
    },
    /// The subscribed room no longer exists
    RoomClosed {
        room_id: RoomId,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        req: Option<u64>,
        code: String,
        msg: String,
    },
}

impl ServerMessage {
    pub fn error(req: Option<u64>, err: &RoomError) -> Self {
        ServerMessage::Error {
            req,
            code: err.code().to_string(),
            msg: err.detail(),
        }
    }

    /// Request id for replies, None for pushed messages
    pub fn req(&self) -> Option<u64> {
        match self {
            ServerMessage::Room { req, .. } | ServerMessage::Ack { req } => Some(*req),
            ServerMessage::Error { req, .. } => *req,
            _ => None,
        }
    }
}

impl From<ForwardedAction> for ServerMessage {
    fn from(f: ForwardedAction) -> Self {
        ServerMessage::ForwardedAction {
            room_id: f.room_id,
            from: f.from,
            action: f.action,
        }
    }
}
