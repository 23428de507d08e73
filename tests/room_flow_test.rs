use std::collections::HashSet;
use std::sync::Arc;
use truthroom::error::RoomError;
use truthroom::protocol::{ClientEnvelope, ClientMessage, ServerMessage};
use truthroom::state::AppState;
use truthroom::types::{GameStatus, PlayerAction, Room};
use truthroom::ws::{handlers::handle_message, ConnectionFeed};

async fn request(
    state: &Arc<AppState>,
    feed: &mut ConnectionFeed,
    req: u64,
    msg: ClientMessage,
) -> ServerMessage {
    handle_message(ClientEnvelope { req, msg }, state, feed).await
}

fn expect_room(reply: ServerMessage) -> Room {
    match reply {
        ServerMessage::Room { room, .. } => room,
        other => panic!("Expected Room reply, got {:?}", other),
    }
}

/// End-to-end game through the request handlers, as the WebSocket server
/// would drive it
#[tokio::test]
async fn test_full_game_flow() {
    let state = Arc::new(AppState::new());
    let mut host = ConnectionFeed::default();
    let mut guest = ConnectionFeed::default();

    // 1. Host creates a room
    let room = expect_room(request(&state, &mut host, 1, ClientMessage::CreateRoom).await);
    let room_id = room.room_id.clone();
    let host_id = room.host_id.clone().expect("created room has a host");
    assert_eq!(room.status, GameStatus::Waiting);
    assert_eq!(room.player_count, 1);

    // 2. Guest joins
    let room = expect_room(
        request(
            &state,
            &mut guest,
            1,
            ClientMessage::JoinRoom {
                room_id: room_id.clone(),
            },
        )
        .await,
    );
    assert_eq!(room.player_count, 2);

    // 3. Host submits three questions
    for (i, text) in ["Q1", "Q2", "Q3"].iter().enumerate() {
        let reply = request(
            &state,
            &mut host,
            10 + i as u64,
            ClientMessage::Execute {
                room_id: room_id.clone(),
                participant_id: host_id.clone(),
                action: PlayerAction::SubmitQuestion(text.to_string()),
            },
        )
        .await;
        assert_eq!(reply, ServerMessage::Ack { req: 10 + i as u64 });
    }

    // 4. Start and draw everything
    let reply = request(
        &state,
        &mut host,
        20,
        ClientMessage::Execute {
            room_id: room_id.clone(),
            participant_id: host_id.clone(),
            action: PlayerAction::StartGame,
        },
    )
    .await;
    assert_eq!(reply, ServerMessage::Ack { req: 20 });

    let mut drawn = Vec::new();
    for i in 0..3 {
        let reply = request(
            &state,
            &mut host,
            30 + i,
            ClientMessage::Execute {
                room_id: room_id.clone(),
                participant_id: host_id.clone(),
                action: PlayerAction::DrawQuestion,
            },
        )
        .await;
        assert_eq!(reply, ServerMessage::Ack { req: 30 + i });

        let room = state.get_room(&room_id).await.unwrap();
        assert_eq!(room.status, GameStatus::Playing);
        let current = room.current_question.clone().unwrap();
        assert!(!room.questions.contains(&current));
        assert_eq!(room.used_questions.last(), Some(&current));
        drawn.push(current);
    }

    let unique: HashSet<_> = drawn.iter().cloned().collect();
    assert_eq!(unique.len(), 3);
    let expected: HashSet<_> = ["Q1", "Q2", "Q3"].iter().map(|s| s.to_string()).collect();
    assert_eq!(unique, expected);

    // 5. Drawing from an empty pool ends the game
    request(
        &state,
        &mut host,
        40,
        ClientMessage::Execute {
            room_id: room_id.clone(),
            participant_id: host_id.clone(),
            action: PlayerAction::DrawQuestion,
        },
    )
    .await;
    let room = state.get_room(&room_id).await.unwrap();
    assert_eq!(room.status, GameStatus::Ended);
    assert!(room.questions.is_empty());
    assert_eq!(room.used_questions.len(), 3);

    // 6. Both leave, the room is gone
    for feed in [&mut guest, &mut host] {
        expect_room(
            request(
                &state,
                feed,
                50,
                ClientMessage::LeaveRoom {
                    room_id: room_id.clone(),
                },
            )
            .await,
        );
    }
    assert!(matches!(
        state.get_room(&room_id).await,
        Err(RoomError::NotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joins_are_not_lost() {
    let state = Arc::new(AppState::new());
    let room = state.create_room().await.unwrap();

    let joins: Vec<_> = (0..50)
        .map(|_| {
            let state = state.clone();
            let room_id = room.room_id.clone();
            tokio::spawn(async move { state.join_room(&room_id).await })
        })
        .collect();
    for join in joins {
        join.await.unwrap().unwrap();
    }

    let room = state.get_room(&room.room_id).await.unwrap();
    assert_eq!(room.player_count, 51);
    assert_eq!(room.version, 51);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_are_all_kept() {
    let state = Arc::new(AppState::new());
    let room = state.create_room().await.unwrap();

    let submits: Vec<_> = (0..40)
        .map(|i| {
            let state = state.clone();
            let room_id = room.room_id.clone();
            tokio::spawn(async move { state.submit_question(&room_id, format!("Q{}", i)).await })
        })
        .collect();
    for submit in submits {
        submit.await.unwrap().unwrap();
    }

    let room = state.get_room(&room.room_id).await.unwrap();
    let unique: HashSet<_> = room.questions.iter().collect();
    assert_eq!(room.questions.len(), 40);
    assert_eq!(unique.len(), 40);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_draws_never_repeat() {
    let state = Arc::new(AppState::new());
    let room = state.create_room().await.unwrap();
    let room_id = room.room_id.clone();
    state.join_room(&room_id).await.unwrap();
    for i in 0..20 {
        state
            .submit_question(&room_id, format!("Q{}", i))
            .await
            .unwrap();
    }
    state.start_game(&room_id).await.unwrap();

    let draws: Vec<_> = (0..20)
        .map(|_| {
            let state = state.clone();
            let room_id = room_id.clone();
            tokio::spawn(async move { state.draw_question(&room_id).await })
        })
        .collect();

    let mut drawn = HashSet::new();
    for draw in draws {
        let room = draw.await.unwrap().unwrap();
        assert!(drawn.insert(room.current_question.unwrap()));
    }

    let room = state.get_room(&room_id).await.unwrap();
    assert!(room.questions.is_empty());
    assert_eq!(room.used_questions.len(), 20);
    assert_eq!(room.status, GameStatus::Playing);

    let room = state.draw_question(&room_id).await.unwrap();
    assert_eq!(room.status, GameStatus::Ended);
}

#[tokio::test]
async fn test_subscribers_see_every_commit_in_order() {
    let state = Arc::new(AppState::new());
    let room = state.create_room().await.unwrap();
    let mut subscription = state
        .subscribe(&room.room_id, "observer")
        .await
        .unwrap();
    assert!(subscription.host_requests.is_none());

    for _ in 0..5 {
        state.join_room(&room.room_id).await.unwrap();
    }

    let mut last_version = room.version;
    for expected_count in 2..=6 {
        let update = subscription.updates.recv().await.unwrap();
        assert_eq!(update.version, last_version + 1);
        assert_eq!(update.player_count, expected_count);
        last_version = update.version;
    }
}

#[tokio::test]
async fn test_guest_cannot_bypass_host() {
    let state = Arc::new(AppState::new());
    let room = state.create_room().await.unwrap();

    let result = state
        .apply_action(&room.room_id, "guest", PlayerAction::SubmitQuestion("Q".into()))
        .await;
    assert_eq!(result, Err(RoomError::NotHost));

    // No host session is listening, so forwarding has nowhere to go
    let result = state
        .forward_action(&room.room_id, "guest", PlayerAction::DrawQuestion)
        .await;
    assert!(matches!(result, Err(RoomError::HostUnavailable(_))));
}
