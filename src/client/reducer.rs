//! Local mirror of one room.
//!
//! The reducer is pure: `SessionState::reduce` takes an action and returns the
//! next state. Room fields only ever change through `JoinRoom` and
//! `UpdateState`, both of which carry authoritative server state.

use serde::Serialize;

use crate::types::*;

/// A partial room. Present fields overwrite, absent fields are kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomPatch {
    pub room_id: Option<RoomId>,
    pub host_id: Option<Option<ParticipantId>>,
    pub player_count: Option<u32>,
    pub questions: Option<Vec<String>>,
    pub used_questions: Option<Vec<String>>,
    pub current_question: Option<Option<String>>,
    pub status: Option<GameStatus>,
    pub version: Option<u64>,
}

impl From<Room> for RoomPatch {
    fn from(room: Room) -> Self {
        Self {
            room_id: Some(room.room_id),
            host_id: Some(room.host_id),
            player_count: Some(room.player_count),
            questions: Some(room.questions),
            used_questions: Some(room.used_questions),
            current_question: Some(room.current_question),
            status: Some(room.status),
            version: Some(room.version),
        }
    }
}

impl RoomPatch {
    fn apply_to(self, room: &mut Room) {
        if let Some(host_id) = self.host_id {
            room.host_id = host_id;
        }
        if let Some(player_count) = self.player_count {
            room.player_count = player_count;
        }
        // Arrays are full snapshots, never deltas
        if let Some(questions) = self.questions {
            room.questions = questions;
        }
        if let Some(used_questions) = self.used_questions {
            room.used_questions = used_questions;
        }
        if let Some(current_question) = self.current_question {
            room.current_question = current_question;
        }
        if let Some(status) = self.status {
            room.status = status;
        }
        if let Some(version) = self.version {
            room.version = version;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    CreateRoom {
        room_id: RoomId,
        host_id: ParticipantId,
    },
    JoinRoom(Room),
    SetClientId(ParticipantId),
    UpdateState(RoomPatch),
    LeaveGame,
}

/// Top-level phase as seen by the presentation layer
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    NoRoom,
    Waiting,
    Playing,
    Ended,
}

/// What the presentation layer reads back
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub status: SessionStatus,
    pub room_id: Option<RoomId>,
    pub player_count: u32,
    pub question_count: usize,
    pub used_question_count: usize,
    pub current_question: Option<String>,
    pub is_host: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    /// None while in the no-room state
    pub room: Option<Room>,
    pub participant_id: Option<ParticipantId>,
}

impl SessionState {
    pub fn reduce(self, action: SessionAction) -> Self {
        match action {
            SessionAction::CreateRoom { room_id, host_id } => Self {
                room: Some(Room::new(room_id, host_id.clone())),
                participant_id: Some(host_id),
            },

            SessionAction::JoinRoom(room) => Self {
                room: Some(room),
                ..self
            },

            SessionAction::SetClientId(participant_id) => Self {
                participant_id: Some(participant_id),
                ..self
            },

            SessionAction::UpdateState(patch) => {
                let Some(mut room) = self.room else {
                    // A late notification after leaving must not resurrect the room
                    return Self { room: None, ..self };
                };

                let other_room = patch
                    .room_id
                    .as_ref()
                    .is_some_and(|id| *id != room.room_id);
                let stale = patch.version.is_some_and(|v| v < room.version);
                if other_room || stale {
                    tracing::debug!(
                        room_id = %room.room_id,
                        other_room,
                        stale,
                        "Ignoring room update"
                    );
                } else {
                    patch.apply_to(&mut room);
                }

                Self {
                    room: Some(room),
                    ..self
                }
            }

            SessionAction::LeaveGame => Self {
                room: None,
                participant_id: self.participant_id,
            },
        }
    }

    pub fn is_host(&self) -> bool {
        match (&self.room, &self.participant_id) {
            (Some(room), Some(participant_id)) => room.is_host(participant_id),
            _ => false,
        }
    }

    pub fn status(&self) -> SessionStatus {
        match self.room.as_ref().map(|r| r.status) {
            None => SessionStatus::NoRoom,
            Some(GameStatus::Waiting) => SessionStatus::Waiting,
            Some(GameStatus::Playing) => SessionStatus::Playing,
            Some(GameStatus::Ended) => SessionStatus::Ended,
        }
    }

    pub fn view(&self) -> SessionView {
        let room = self.room.as_ref();
        SessionView {
            status: self.status(),
            room_id: room.map(|r| r.room_id.clone()),
            player_count: room.map(|r| r.player_count).unwrap_or(0),
            question_count: room.map(|r| r.questions.len()).unwrap_or(0),
            used_question_count: room.map(|r| r.used_questions.len()).unwrap_or(0),
            current_question: room.and_then(|r| r.current_question.clone()),
            is_host: self.is_host(),
        }
    }
}
