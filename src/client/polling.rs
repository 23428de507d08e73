//! Change feed that re-reads the room on a fixed interval.
//!
//! For deployments where the push channel is unavailable. It only carries
//! room snapshots, so a host cannot receive forwarded actions through it.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::transport::{ChangeFeed, FeedEvent, RoomTransport, FEED_BUFFER};
use crate::error::{RoomError, RoomResult};

pub struct PollingFeed {
    transport: Arc<dyn RoomTransport>,
    interval: Duration,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl PollingFeed {
    pub fn new(transport: Arc<dyn RoomTransport>, interval: Duration) -> Self {
        Self {
            transport,
            interval: interval.max(Duration::from_millis(10)),
            pump: Mutex::new(None),
        }
    }
}

impl Drop for PollingFeed {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.get_mut().take() {
            pump.abort();
        }
    }
}

async fn poll_room(
    transport: Arc<dyn RoomTransport>,
    room_id: String,
    mut last_version: u64,
    period: Duration,
    tx: mpsc::Sender<FeedEvent>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let event = match transport.get_room(&room_id).await {
            Ok(room) if room.version != last_version => {
                last_version = room.version;
                FeedEvent::Update(room)
            }
            Ok(_) => continue,
            Err(RoomError::NotFound(_)) => FeedEvent::RoomClosed(room_id.clone()),
            Err(e) => {
                tracing::warn!(room_id = %room_id, "Poll failed, retrying: {}", e);
                continue;
            }
        };

        let closed = matches!(event, FeedEvent::RoomClosed(_));
        if tx.send(event).await.is_err() || closed {
            break;
        }
    }
}

#[async_trait]
impl ChangeFeed for PollingFeed {
    async fn subscribe(
        &self,
        room_id: &str,
        _participant_id: &str,
    ) -> RoomResult<mpsc::Receiver<FeedEvent>> {
        let room = self.transport.get_room(room_id).await?;
        let (tx, rx) = mpsc::channel(FEED_BUFFER);

        let pump = tokio::spawn(poll_room(
            self.transport.clone(),
            room.room_id,
            room.version,
            self.interval,
            tx,
        ));
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::local::LocalTransport;
    use crate::state::AppState;

    #[tokio::test]
    async fn test_poll_emits_changes_then_closes() {
        let state = Arc::new(AppState::new());
        let room = state.create_room().await.unwrap();
        let transport: Arc<dyn RoomTransport> = Arc::new(LocalTransport::new(state.clone()));
        let feed = PollingFeed::new(transport, Duration::from_millis(20));

        let mut rx = feed.subscribe(&room.room_id, "guest").await.unwrap();

        state.join_room(&room.room_id).await.unwrap();
        match rx.recv().await {
            Some(FeedEvent::Update(room)) => assert_eq!(room.player_count, 2),
            other => panic!("expected update, got {:?}", other),
        }

        state.leave_room(&room.room_id).await.unwrap();
        state.leave_room(&room.room_id).await.unwrap();
        loop {
            match rx.recv().await {
                Some(FeedEvent::RoomClosed(id)) => {
                    assert_eq!(id, room.room_id);
                    break;
                }
                Some(FeedEvent::Update(_)) => continue,
                other => panic!("expected room closed, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_subscribe_to_missing_room_fails() {
        let state = Arc::new(AppState::new());
        let transport: Arc<dyn RoomTransport> = Arc::new(LocalTransport::new(state));
        let feed = PollingFeed::new(transport, Duration::from_millis(20));

        assert!(matches!(
            feed.subscribe("ZZZZ", "guest").await,
            Err(RoomError::NotFound(_))
        ));
    }
}
