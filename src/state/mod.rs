mod actions;
mod room;

use crate::config::{RoomLimits, ServerConfig};
use crate::notifier::ChangeNotifier;
use crate::types::*;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A stored room plus bookkeeping that never leaves the server
#[derive(Debug, Clone)]
pub struct RoomRecord {
    pub room: Room,
    pub last_activity: DateTime<Utc>,
}

/// Shared application state: the authoritative room store
#[derive(Clone)]
pub struct AppState {
    pub rooms: Arc<RwLock<HashMap<RoomId, RoomRecord>>>,
    /// Delivers every committed room change to subscribers
    pub notifier: ChangeNotifier,
    pub limits: RoomLimits,
}

impl AppState {
    pub fn new() -> Self {
        Self::with_limits(RoomLimits::default(), ChangeNotifier::default())
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::with_limits(
            config.limits.clone(),
            ChangeNotifier::new(config.broadcast_capacity),
        )
    }

    pub fn with_limits(limits: RoomLimits, notifier: ChangeNotifier) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            notifier,
            limits,
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RoomError;

    async fn room_with_questions(state: &AppState, players: u32, questions: &[&str]) -> Room {
        let room = state.create_room().await.unwrap();
        for _ in 1..players {
            state.join_room(&room.room_id).await.unwrap();
        }
        for q in questions {
            state
                .submit_question(&room.room_id, q.to_string())
                .await
                .unwrap();
        }
        state.get_room(&room.room_id).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_room() {
        let state = AppState::new();
        let room = state.create_room().await.unwrap();

        assert_eq!(room.room_id.len(), 4);
        assert!(room
            .room_id
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()));
        assert_eq!(room.status, GameStatus::Waiting);
        assert_eq!(room.player_count, 1);
        assert!(room.questions.is_empty());
        assert!(room.used_questions.is_empty());
        assert!(room.current_question.is_none());
        assert!(room.host_id.as_ref().is_some_and(|h| h.len() >= 10));
    }

    #[tokio::test]
    async fn test_create_then_get_round_trip() {
        let state = AppState::new();
        let created = state.create_room().await.unwrap();
        let fetched = state.get_room(&created.room_id).await.unwrap();
        assert_eq!(created, fetched);
    }

    #[tokio::test]
    async fn test_room_codes_are_unique() {
        let state = AppState::new();
        let mut codes = std::collections::HashSet::new();
        for _ in 0..200 {
            let room = state.create_room().await.unwrap();
            assert!(codes.insert(room.room_id));
        }
    }

    #[tokio::test]
    async fn test_unknown_room_is_not_found_and_not_created() {
        let state = AppState::new();

        assert!(matches!(
            state.get_room("ZZZZ").await,
            Err(RoomError::NotFound(_))
        ));
        assert!(matches!(
            state.join_room("ZZZZ").await,
            Err(RoomError::NotFound(_))
        ));
        assert!(matches!(
            state.leave_room("ZZZZ").await,
            Err(RoomError::NotFound(_))
        ));
        assert!(matches!(
            state.submit_question("ZZZZ", "Q".to_string()).await,
            Err(RoomError::NotFound(_))
        ));
        assert!(matches!(
            state.draw_question("ZZZZ").await,
            Err(RoomError::NotFound(_))
        ));
        assert!(state.rooms.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_join_and_leave_counts() {
        let state = AppState::new();
        let room = state.create_room().await.unwrap();

        let joined = state.join_room(&room.room_id).await.unwrap();
        assert_eq!(joined.player_count, 2);
        assert!(joined.version > room.version);

        let left = state.leave_room(&room.room_id).await.unwrap();
        assert_eq!(left.player_count, 1);
    }

    #[tokio::test]
    async fn test_last_leave_deletes_room() {
        let state = AppState::new();
        let room = state.create_room().await.unwrap();

        let left = state.leave_room(&room.room_id).await.unwrap();
        assert_eq!(left.player_count, 0);
        assert!(matches!(
            state.get_room(&room.room_id).await,
            Err(RoomError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_submit_question_validation() {
        let state = AppState::new();
        let room = state.create_room().await.unwrap();

        let result = state.submit_question(&room.room_id, "   ".to_string()).await;
        assert!(matches!(result, Err(RoomError::InvariantViolation(_))));

        let too_long = "x".repeat(state.limits.max_question_chars + 1);
        assert!(state.submit_question(&room.room_id, too_long).await.is_err());

        state
            .submit_question(&room.room_id, "  What scares you?  ".to_string())
            .await
            .unwrap();
        let room = state.get_room(&room.room_id).await.unwrap();
        assert_eq!(room.questions, vec!["What scares you?".to_string()]);
    }

    #[tokio::test]
    async fn test_start_game_floor() {
        let state = AppState::new();

        let lonely = room_with_questions(&state, 1, &["Q1", "Q2", "Q3"]).await;
        assert!(matches!(
            state.start_game(&lonely.room_id).await,
            Err(RoomError::InvariantViolation(_))
        ));

        let thin = room_with_questions(&state, 2, &["Q1", "Q2"]).await;
        assert!(state.start_game(&thin.room_id).await.is_err());

        let ready = room_with_questions(&state, 2, &["Q1", "Q2", "Q3"]).await;
        let started = state.start_game(&ready.room_id).await.unwrap();
        assert_eq!(started.status, GameStatus::Playing);

        // Cannot start twice
        assert!(state.start_game(&ready.room_id).await.is_err());
    }

    #[tokio::test]
    async fn test_draw_requires_playing() {
        let state = AppState::new();
        let room = room_with_questions(&state, 2, &["Q1", "Q2", "Q3"]).await;

        assert!(matches!(
            state.draw_question(&room.room_id).await,
            Err(RoomError::InvariantViolation(_))
        ));
        let room = state.get_room(&room.room_id).await.unwrap();
        assert_eq!(room.status, GameStatus::Waiting);
        assert_eq!(room.questions.len(), 3);
    }

    #[tokio::test]
    async fn test_draw_until_ended() {
        let state = AppState::new();
        let room = room_with_questions(&state, 2, &["Q1", "Q2", "Q3"]).await;
        state.start_game(&room.room_id).await.unwrap();

        let mut drawn = Vec::new();
        for remaining in (0..3).rev() {
            let room = state.draw_question(&room.room_id).await.unwrap();
            let current = room.current_question.clone().unwrap();
            assert_eq!(room.questions.len(), remaining);
            assert!(!room.questions.contains(&current));
            assert_eq!(room.used_questions.last(), Some(&current));
            drawn.push(current);
        }

        let room = state.get_room(&room.room_id).await.unwrap();
        assert_eq!(room.used_questions, drawn);
        assert_eq!(room.status, GameStatus::Playing);

        let ended = state.draw_question(&room.room_id).await.unwrap();
        assert_eq!(ended.status, GameStatus::Ended);
        assert_eq!(ended.used_questions.len(), 3);

        // Ended rooms accept no further questions or draws
        assert!(state
            .submit_question(&room.room_id, "Q4".to_string())
            .await
            .is_err());
        assert!(state.draw_question(&room.room_id).await.is_err());
    }

    #[tokio::test]
    async fn test_every_commit_is_published_in_order() {
        let state = AppState::new();
        let room = state.create_room().await.unwrap();
        let mut sub = state.notifier.subscribe(&room.room_id, false);

        state.join_room(&room.room_id).await.unwrap();
        state
            .submit_question(&room.room_id, "Q1".to_string())
            .await
            .unwrap();

        let first = sub.updates.recv().await.unwrap();
        let second = sub.updates.recv().await.unwrap();
        assert_eq!(first.player_count, 2);
        assert_eq!(second.questions, vec!["Q1".to_string()]);
        assert_eq!(second.version, first.version + 1);
    }

    #[tokio::test]
    async fn test_apply_action_requires_host() {
        let state = AppState::new();
        let room = state.create_room().await.unwrap();
        let host = room.host_id.clone().unwrap();

        let result = state
            .apply_action(
                &room.room_id,
                "someone-else",
                PlayerAction::SubmitQuestion("Q1".to_string()),
            )
            .await;
        assert_eq!(result, Err(RoomError::NotHost));

        state
            .apply_action(
                &room.room_id,
                &host,
                PlayerAction::SubmitQuestion("Q1".to_string()),
            )
            .await
            .unwrap();
        let room = state.get_room(&room.room_id).await.unwrap();
        assert_eq!(room.questions.len(), 1);
    }

    #[tokio::test]
    async fn test_forward_action_reaches_host_subscription() {
        let state = AppState::new();
        let room = state.create_room().await.unwrap();

        let err = state
            .forward_action(&room.room_id, "guest", PlayerAction::DrawQuestion)
            .await;
        assert!(matches!(err, Err(RoomError::HostUnavailable(_))));

        let host = room.host_id.clone().unwrap();
        let mut sub = state.subscribe(&room.room_id, &host).await.unwrap();
        state
            .forward_action(&room.room_id, "guest", PlayerAction::DrawQuestion)
            .await
            .unwrap();

        let forwarded = sub.host_requests.as_mut().unwrap().recv().await.unwrap();
        assert_eq!(forwarded.from, "guest");
        assert_eq!(forwarded.action, PlayerAction::DrawQuestion);
    }

    #[tokio::test]
    async fn test_guest_subscription_has_no_host_channel() {
        let state = AppState::new();
        let room = state.create_room().await.unwrap();
        let sub = state.subscribe(&room.room_id, "guest").await.unwrap();
        assert!(sub.host_requests.is_none());
        assert!(matches!(
            state.subscribe("ZZZZ", "guest").await,
            Err(RoomError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_subscribe_racing_last_leave_always_sees_close() {
        use tokio::sync::broadcast::error::RecvError;

        let state = Arc::new(AppState::new());
        for _ in 0..200 {
            let room = state.create_room().await.unwrap();
            let leave = {
                let state = state.clone();
                let room_id = room.room_id.clone();
                tokio::spawn(async move { state.leave_room(&room_id).await })
            };

            let subscribed = state.subscribe(&room.room_id, "guest").await;
            leave.await.unwrap().unwrap();

            // Either the room was already gone, or the subscriber learns it closed
            if let Ok(mut sub) = subscribed {
                let closed = tokio::time::timeout(std::time::Duration::from_secs(1), async {
                    loop {
                        match sub.updates.recv().await {
                            Ok(_) => continue,
                            Err(RecvError::Closed) => break,
                            Err(e) => panic!("unexpected {:?}", e),
                        }
                    }
                })
                .await;
                assert!(closed.is_ok(), "subscriber never saw the room close");
            }
            assert_eq!(state.notifier.room_count(), 0);
        }
    }

    #[tokio::test]
    async fn test_reap_idle_rooms() {
        let state = AppState::new();
        let stale = state.create_room().await.unwrap();
        let fresh = state.create_room().await.unwrap();

        {
            let mut rooms = state.rooms.write().await;
            let record = rooms.get_mut(&stale.room_id).unwrap();
            record.last_activity = Utc::now() - chrono::Duration::hours(7);
        }

        let reaped = state
            .reap_idle_rooms(std::time::Duration::from_secs(6 * 60 * 60))
            .await;
        assert_eq!(reaped, vec![stale.room_id.clone()]);
        assert!(state.get_room(&stale.room_id).await.is_err());
        assert!(state.get_room(&fresh.room_id).await.is_ok());
    }
}
