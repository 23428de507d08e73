use super::AppState;
use crate::error::RoomError;
use crate::notifier::RoomSubscription;
use crate::types::*;

impl AppState {
    /// Execute a player action on behalf of the room's host.
    ///
    /// Only the host may write; guests reach this through the host's session
    /// after forwarding.
    pub async fn apply_action(
        &self,
        room_id: &str,
        participant_id: &str,
        action: PlayerAction,
    ) -> Result<Room, RoomError> {
        let room = self.get_room(room_id).await?;
        if !room.is_host(participant_id) {
            tracing::warn!(room_id, action = action.name(), "Rejected action from non-host");
            return Err(RoomError::NotHost);
        }

        tracing::debug!(room_id, action = action.name(), "Applying action");
        match action {
            PlayerAction::SubmitQuestion(text) => self.submit_question(room_id, text).await,
            PlayerAction::StartGame => self.start_game(room_id).await,
            PlayerAction::DrawQuestion => self.draw_question(room_id).await,
        }
    }

    /// Hand a guest's action to the host's subscription
    pub async fn forward_action(
        &self,
        room_id: &str,
        participant_id: &str,
        action: PlayerAction,
    ) -> Result<(), RoomError> {
        // Unknown rooms are NotFound rather than HostUnavailable
        self.get_room(room_id).await?;

        tracing::debug!(room_id, action = action.name(), "Forwarding action to host");
        self.notifier.forward(ForwardedAction {
            room_id: room_id.to_string(),
            from: participant_id.to_string(),
            action,
        })
    }

    /// Subscribe to a room's change feed. The host's subscription also
    /// receives forwarded actions.
    pub async fn subscribe(
        &self,
        room_id: &str,
        participant_id: &str,
    ) -> Result<RoomSubscription, RoomError> {
        // Deleting a room closes its channels under the write lock, so holding
        // the read lock here keeps a deletion from slipping in before the
        // channel entry exists
        let rooms = self.rooms.read().await;
        let record = rooms
            .get(room_id)
            .ok_or_else(|| RoomError::NotFound(room_id.to_string()))?;
        Ok(self
            .notifier
            .subscribe(room_id, record.room.is_host(participant_id)))
    }
}
