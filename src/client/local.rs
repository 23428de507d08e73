//! In-process transport over a shared `AppState`.
//!
//! Used when the store and the session live in the same process, and by the
//! test suite to run many sessions against one store without a network.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast::error::RecvError, mpsc, Mutex};
use tokio::task::JoinHandle;

use super::transport::{ChangeFeed, FeedEvent, RoomTransport, FEED_BUFFER};
use crate::error::RoomResult;
use crate::notifier::{recv_or_pending, RoomSubscription};
use crate::state::AppState;
use crate::types::*;

pub struct LocalTransport {
    state: Arc<AppState>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl LocalTransport {
    pub fn new(state: Arc<AppState>) -> Self {
        Self {
            state,
            pump: Mutex::new(None),
        }
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.get_mut().take() {
            pump.abort();
        }
    }
}

#[async_trait]
impl RoomTransport for LocalTransport {
    async fn create_room(&self) -> RoomResult<Room> {
        self.state.create_room().await
    }

    async fn get_room(&self, room_id: &str) -> RoomResult<Room> {
        self.state.get_room(room_id).await
    }

    async fn join_room(&self, room_id: &str) -> RoomResult<Room> {
        self.state.join_room(room_id).await
    }

    async fn leave_room(&self, room_id: &str) -> RoomResult<Room> {
        self.state.leave_room(room_id).await
    }

    async fn execute(
        &self,
        room_id: &str,
        participant_id: &str,
        action: PlayerAction,
    ) -> RoomResult<()> {
        self.state
            .apply_action(room_id, participant_id, action)
            .await
            .map(|_| ())
    }

    async fn forward(
        &self,
        room_id: &str,
        participant_id: &str,
        action: PlayerAction,
    ) -> RoomResult<()> {
        self.state
            .forward_action(room_id, participant_id, action)
            .await
    }
}

/// Move events from a store subscription into the session's channel
async fn pump_subscription(
    state: Arc<AppState>,
    subscription: RoomSubscription,
    tx: mpsc::Sender<FeedEvent>,
) {
    let RoomSubscription {
        room_id,
        mut updates,
        mut host_requests,
        guard: _guard,
    } = subscription;

    loop {
        let event = tokio::select! {
            update = updates.recv() => match update {
                Ok(room) => FeedEvent::Update(room),
                Err(RecvError::Lagged(_)) => match state.get_room(&room_id).await {
                    Ok(room) => FeedEvent::Update(room),
                    Err(_) => FeedEvent::RoomClosed(room_id.clone()),
                },
                Err(RecvError::Closed) => FeedEvent::RoomClosed(room_id.clone()),
            },
            request = recv_or_pending(&mut host_requests) => match request {
                Ok(forwarded) => FeedEvent::Forwarded(forwarded),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(room_id = %room_id, skipped, "Forwarded actions dropped");
                    continue;
                }
                Err(RecvError::Closed) => {
                    host_requests = None;
                    continue;
                }
            },
        };

        let closed = matches!(event, FeedEvent::RoomClosed(_));
        if tx.send(event).await.is_err() || closed {
            break;
        }
    }
}

#[async_trait]
impl ChangeFeed for LocalTransport {
    async fn subscribe(
        &self,
        room_id: &str,
        participant_id: &str,
    ) -> RoomResult<mpsc::Receiver<FeedEvent>> {
        let subscription = self.state.subscribe(room_id, participant_id).await?;
        let (tx, rx) = mpsc::channel(FEED_BUFFER);

        let pump = tokio::spawn(pump_subscription(self.state.clone(), subscription, tx));
        if let Some(previous) = self.pump.lock().await.replace(pump) {
            previous.abort();
        }
        Ok(rx)
    }

    async fn unsubscribe(&self) {
        if let Some(pump) = self.pump.lock().await.take() {
            pump.abort();
        }
    }
}
