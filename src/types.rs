use serde::{Deserialize, Serialize};

use crate::error::RoomError;

/// Opaque ID types for readability
pub type RoomId = String;
pub type ParticipantId = String;

/// Length of a room code
pub const ROOM_CODE_LENGTH: usize = 4;

/// Characters a room code is drawn from
pub const ROOM_CODE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Minimum players needed before the host may start
pub const MIN_PLAYERS_TO_START: u32 = 2;

/// Minimum submitted questions needed before the host may start
pub const MIN_QUESTIONS_TO_START: usize = 3;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Waiting,
    Playing,
    Ended,
}

impl GameStatus {
    /// Status only ever moves forward: waiting -> playing -> ended
    pub fn can_transition_to(&self, to: GameStatus) -> bool {
        matches!(
            (self, to),
            (GameStatus::Waiting, GameStatus::Playing) | (GameStatus::Playing, GameStatus::Ended)
        )
    }
}

/// The authoritative room document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub room_id: RoomId,
    pub host_id: Option<ParticipantId>,
    pub player_count: u32,
    pub questions: Vec<String>,
    pub used_questions: Vec<String>,
    pub current_question: Option<String>,
    pub status: GameStatus,
    /// Commit counter, bumped on every committed mutation
    #[serde(default)]
    pub version: u64,
}

impl Room {
    /// A fresh waiting room owned by `host_id`
    pub fn new(room_id: RoomId, host_id: ParticipantId) -> Self {
        Self {
            room_id,
            host_id: Some(host_id),
            player_count: 1,
            questions: Vec::new(),
            used_questions: Vec::new(),
            current_question: None,
            status: GameStatus::Waiting,
            version: 1,
        }
    }

    pub fn is_host(&self, participant_id: &str) -> bool {
        self.host_id.as_deref() == Some(participant_id)
    }

    /// Check the minimum-viable-game floor for starting
    pub fn check_start_eligible(&self) -> Result<(), RoomError> {
        if !self.status.can_transition_to(GameStatus::Playing) {
            return Err(RoomError::InvariantViolation(format!(
                "Cannot start a game that is {:?}",
                self.status
            )));
        }
        if self.player_count < MIN_PLAYERS_TO_START {
            return Err(RoomError::InvariantViolation(format!(
                "Need at least {} players to start (have {})",
                MIN_PLAYERS_TO_START, self.player_count
            )));
        }
        if self.questions.len() < MIN_QUESTIONS_TO_START {
            return Err(RoomError::InvariantViolation(format!(
                "Need at least {} questions to start (have {})",
                MIN_QUESTIONS_TO_START,
                self.questions.len()
            )));
        }
        Ok(())
    }
}

/// Actions a participant can request against a room.
///
/// Every participant may send these; only the host's session executes them
/// against the store, guests forward them to the host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerAction {
    SubmitQuestion(String),
    StartGame,
    DrawQuestion,
}

impl PlayerAction {
    pub fn name(&self) -> &'static str {
        match self {
            PlayerAction::SubmitQuestion(_) => "SUBMIT_QUESTION",
            PlayerAction::StartGame => "START_GAME",
            PlayerAction::DrawQuestion => "DRAW_QUESTION",
        }
    }
}

/// A guest's action on its way to the host
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForwardedAction {
    pub room_id: RoomId,
    pub from: ParticipantId,
    pub action: PlayerAction,
}

/// Normalize user input into a room code (uppercase, exactly 4 of [A-Z0-9])
pub fn normalize_room_code(input: &str) -> Result<RoomId, RoomError> {
    let code = input.trim().to_ascii_uppercase();
    let valid = code.len() == ROOM_CODE_LENGTH
        && code.bytes().all(|b| ROOM_CODE_CHARS.contains(&b));
    if valid {
        Ok(code)
    } else {
        Err(RoomError::InvalidRoomCode(input.to_string()))
    }
}

/// Generate an opaque participant id
pub fn new_participant_id() -> ParticipantId {
    ulid::Ulid::new().to_string()
}
