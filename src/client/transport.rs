//! Seams between a session and the room server.
//!
//! `RoomTransport` carries requests, `ChangeFeed` carries notifications.
//! Push and polling feeds implement the same contract, so the session never
//! depends on how changes arrive.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::RoomResult;
use crate::types::*;

/// Buffer between a feed and the session consuming it
pub const FEED_BUFFER: usize = 64;

/// Something a change feed delivers to a session
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// Full authoritative room state
    Update(Room),
    /// A guest's action, only delivered to the host
    Forwarded(ForwardedAction),
    /// The room was deleted; no further events follow
    RoomClosed(RoomId),
}

/// Request path to the room store
#[async_trait]
pub trait RoomTransport: Send + Sync {
    async fn create_room(&self) -> RoomResult<Room>;

    /// Pure read, never changes the player count
    async fn get_room(&self, room_id: &str) -> RoomResult<Room>;

    async fn join_room(&self, room_id: &str) -> RoomResult<Room>;

    async fn leave_room(&self, room_id: &str) -> RoomResult<Room>;

    /// Run an action against the store as the host
    async fn execute(
        &self,
        room_id: &str,
        participant_id: &str,
        action: PlayerAction,
    ) -> RoomResult<()>;

    /// Send an action to the host's session
    async fn forward(
        &self,
        room_id: &str,
        participant_id: &str,
        action: PlayerAction,
    ) -> RoomResult<()>;
}

/// Notification path from the room store. One feed serves one room at a
/// time; subscribing again replaces the previous subscription.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(
        &self,
        room_id: &str,
        participant_id: &str,
    ) -> RoomResult<mpsc::Receiver<FeedEvent>>;

    async fn unsubscribe(&self);
}
