use super::{AppState, RoomRecord};
use crate::config::RoomLimits;
use crate::error::RoomError;
use crate::types::*;
use chrono::Utc;
use rand::Rng;
use std::time::Duration;

/// Give up on finding a free room code after this many collisions
const MAX_CODE_ATTEMPTS: usize = 10_000;

/// Generate a random room code (4 characters of A-Z0-9)
fn generate_room_code() -> RoomId {
    let mut rng = rand::rng();
    (0..ROOM_CODE_LENGTH)
        .map(|_| ROOM_CODE_CHARS[rng.random_range(0..ROOM_CODE_CHARS.len())] as char)
        .collect()
}

fn validate_question(text: String, limits: &RoomLimits) -> Result<String, RoomError> {
    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(RoomError::InvariantViolation(
            "Question cannot be empty".to_string(),
        ));
    }
    if text.chars().count() > limits.max_question_chars {
        return Err(RoomError::InvariantViolation(format!(
            "Question is longer than {} characters",
            limits.max_question_chars
        )));
    }
    Ok(text)
}

impl AppState {
    /// Create a new waiting room with a fresh host id
    pub async fn create_room(&self) -> Result<Room, RoomError> {
        let mut rooms = self.rooms.write().await;

        // Rejection sampling against live codes, under the write lock so no
        // concurrent create can claim the same code
        let room_id = (0..MAX_CODE_ATTEMPTS)
            .map(|_| generate_room_code())
            .find(|code| !rooms.contains_key(code))
            .ok_or_else(|| RoomError::StoreUnavailable("No free room codes left".to_string()))?;

        let room = Room::new(room_id.clone(), new_participant_id());
        rooms.insert(
            room_id.clone(),
            RoomRecord {
                room: room.clone(),
                last_activity: Utc::now(),
            },
        );

        tracing::info!(room_id = %room.room_id, "Room created");
        Ok(room)
    }

    /// Get a room by code
    pub async fn get_room(&self, room_id: &str) -> Result<Room, RoomError> {
        self.rooms
            .read()
            .await
            .get(room_id)
            .map(|record| record.room.clone())
            .ok_or_else(|| RoomError::NotFound(room_id.to_string()))
    }

    /// Run `f` against a copy of the room under the write lock and commit it
    /// only if `f` succeeds. Committing bumps the version and publishes the new
    /// snapshot before the lock is released, so subscribers see commit order.
    async fn mutate<F>(&self, room_id: &str, f: F) -> Result<Room, RoomError>
    where
        F: FnOnce(&mut Room, &RoomLimits) -> Result<(), RoomError>,
    {
        let mut rooms = self.rooms.write().await;
        let record = rooms
            .get_mut(room_id)
            .ok_or_else(|| RoomError::NotFound(room_id.to_string()))?;

        let mut next = record.room.clone();
        f(&mut next, &self.limits)?;
        next.version = record.room.version + 1;

        record.room = next;
        record.last_activity = Utc::now();
        self.notifier.publish(&record.room);

        Ok(record.room.clone())
    }

    /// Atomically add one player
    pub async fn join_room(&self, room_id: &str) -> Result<Room, RoomError> {
        let room = self
            .mutate(room_id, |room, _| {
                room.player_count += 1;
                Ok(())
            })
            .await?;
        tracing::info!(room_id, player_count = room.player_count, "Player joined");
        Ok(room)
    }

    /// Atomically remove one player (floored at zero). The room is deleted
    /// once nobody is left.
    pub async fn leave_room(&self, room_id: &str) -> Result<Room, RoomError> {
        let mut rooms = self.rooms.write().await;
        let record = rooms
            .get_mut(room_id)
            .ok_or_else(|| RoomError::NotFound(room_id.to_string()))?;

        record.room.player_count = record.room.player_count.saturating_sub(1);
        record.room.version += 1;
        record.last_activity = Utc::now();
        self.notifier.publish(&record.room);
        let room = record.room.clone();

        if room.player_count == 0 {
            rooms.remove(room_id);
            self.notifier.close_room(room_id);
            tracing::info!(room_id, "Last player left, room deleted");
        } else {
            tracing::info!(room_id, player_count = room.player_count, "Player left");
        }
        Ok(room)
    }

    /// Atomically append a question to the pool
    pub async fn submit_question(&self, room_id: &str, text: String) -> Result<Room, RoomError> {
        let room = self
            .mutate(room_id, |room, limits| {
                if room.status == GameStatus::Ended {
                    return Err(RoomError::InvariantViolation(
                        "The game has ended".to_string(),
                    ));
                }
                let text = validate_question(text, limits)?;
                room.questions.push(text);
                Ok(())
            })
            .await?;
        tracing::debug!(room_id, questions = room.questions.len(), "Question submitted");
        Ok(room)
    }

    /// Move the room from waiting to playing, enforcing the start floor
    pub async fn start_game(&self, room_id: &str) -> Result<Room, RoomError> {
        let room = self
            .mutate(room_id, |room, _| {
                room.check_start_eligible()?;
                room.status = GameStatus::Playing;
                Ok(())
            })
            .await?;
        tracing::info!(room_id, "Game started");
        Ok(room)
    }

    /// Draw a uniformly random question, or end the game if none are left.
    /// Read, pick and write happen in one transaction, so concurrent draws
    /// never draw the same question twice.
    pub async fn draw_question(&self, room_id: &str) -> Result<Room, RoomError> {
        let room = self
            .mutate(room_id, |room, _| {
                // A draw may end the game, so it needs the playing -> ended edge
                if !room.status.can_transition_to(GameStatus::Ended) {
                    return Err(RoomError::InvariantViolation(format!(
                        "Cannot draw while the game is {:?}",
                        room.status
                    )));
                }

                if room.questions.is_empty() {
                    room.status = GameStatus::Ended;
                    return Ok(());
                }

                let index = rand::rng().random_range(0..room.questions.len());
                let question = room.questions.remove(index);
                room.used_questions.push(question.clone());
                room.current_question = Some(question);
                Ok(())
            })
            .await?;

        if room.status == GameStatus::Ended {
            tracing::info!(room_id, rounds = room.used_questions.len(), "Game ended");
        } else {
            tracing::debug!(room_id, remaining = room.questions.len(), "Question drawn");
        }
        Ok(room)
    }

    /// Delete rooms with no activity for longer than `ttl`
    pub async fn reap_idle_rooms(&self, ttl: Duration) -> Vec<RoomId> {
        let cutoff = match chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
        {
            Some(cutoff) => cutoff,
            None => return Vec::new(),
        };

        let mut rooms = self.rooms.write().await;
        let expired: Vec<RoomId> = rooms
            .iter()
            .filter(|(_, record)| record.last_activity < cutoff)
            .map(|(id, _)| id.clone())
            .collect();

        for room_id in &expired {
            rooms.remove(room_id);
            self.notifier.close_room(room_id);
        }
        expired
    }
}
