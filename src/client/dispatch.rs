use crate::error::RoomError;
use crate::types::*;

use super::reducer::SessionState;

/// How an action reaches the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The local participant is host and calls the mutator itself
    HostExecute,
    /// A guest hands the action to the host's session
    ForwardToHost,
}

/// A resolved action, ready to send
#[derive(Debug, Clone, PartialEq)]
pub struct ActionPlan {
    pub dispatch: Dispatch,
    pub room_id: RoomId,
    pub participant_id: ParticipantId,
    pub action: PlayerAction,
}

/// Check local preconditions and decide the route for `action`.
///
/// Nothing is applied locally; the effect arrives with the next update.
pub fn plan_action(state: &SessionState, action: PlayerAction) -> Result<ActionPlan, RoomError> {
    let room = state.room.as_ref().ok_or_else(|| {
        RoomError::InvariantViolation("Not in a room".to_string())
    })?;
    let participant_id = state.participant_id.clone().ok_or_else(|| {
        RoomError::InvariantViolation("No participant id".to_string())
    })?;

    match &action {
        PlayerAction::SubmitQuestion(text) => {
            if text.trim().is_empty() {
                return Err(RoomError::InvariantViolation(
                    "Question cannot be empty".to_string(),
                ));
            }
            if room.status == GameStatus::Ended {
                return Err(RoomError::InvariantViolation(
                    "The game has ended".to_string(),
                ));
            }
        }
        PlayerAction::StartGame => room.check_start_eligible()?,
        PlayerAction::DrawQuestion => {
            if room.status != GameStatus::Playing {
                return Err(RoomError::InvariantViolation(
                    "The game is not running".to_string(),
                ));
            }
        }
    }

    let dispatch = if room.is_host(&participant_id) {
        Dispatch::HostExecute
    } else {
        Dispatch::ForwardToHost
    };

    Ok(ActionPlan {
        dispatch,
        room_id: room.room_id.clone(),
        participant_id,
        action,
    })
}
