//! Per-room change notification.
//!
//! The notifier owns an explicit registry of room channels. A channel pair is
//! created by the first subscriber of a room and removed again when the last
//! subscription guard is dropped or the room is closed. Each room has:
//! - an update channel carrying every committed `Room` snapshot
//! - a host channel carrying actions guests forwarded to the host

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

use crate::error::RoomError;
use crate::types::{ForwardedAction, Room, RoomId};

/// Default buffer size of each room's broadcast channels
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

struct RoomChannels {
    updates: broadcast::Sender<Room>,
    host_requests: broadcast::Sender<ForwardedAction>,
    subscribers: usize,
    generation: u64,
}

#[derive(Default)]
struct Registry {
    rooms: HashMap<RoomId, RoomChannels>,
    next_generation: u64,
}

#[derive(Clone)]
pub struct ChangeNotifier {
    registry: Arc<Mutex<Registry>>,
    capacity: usize,
}

/// A live subscription to one room.
///
/// Fields are public so connection loops can poll both receivers
/// independently; the guard must be kept alive as long as either is used.
pub struct RoomSubscription {
    pub room_id: RoomId,
    pub updates: broadcast::Receiver<Room>,
    /// Only present for the room's host
    pub host_requests: Option<broadcast::Receiver<ForwardedAction>>,
    pub guard: SubscriptionGuard,
}

/// Releases the registry slot of a subscription when dropped
pub struct SubscriptionGuard {
    notifier: ChangeNotifier,
    room_id: RoomId,
    generation: u64,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.notifier.release(&self.room_id, self.generation);
    }
}

impl ChangeNotifier {
    pub fn new(capacity: usize) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        // Nothing in the registry can be left half-updated by a panic
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Subscribe to a room's updates, and to its host channel if `as_host`
    pub fn subscribe(&self, room_id: &str, as_host: bool) -> RoomSubscription {
        let mut registry = self.lock();
        let generation = registry.next_generation;
        let capacity = self.capacity;

        let channels = registry
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| {
                let (updates, _) = broadcast::channel(capacity);
                let (host_requests, _) = broadcast::channel(capacity);
                RoomChannels {
                    updates,
                    host_requests,
                    subscribers: 0,
                    generation,
                }
            });
        channels.subscribers += 1;

        let subscription_generation = channels.generation;
        let updates = channels.updates.subscribe();
        let host_requests = as_host.then(|| channels.host_requests.subscribe());

        if subscription_generation == generation {
            registry.next_generation += 1;
        }
        drop(registry);

        tracing::debug!(room_id, as_host, "Subscribed to room");

        RoomSubscription {
            room_id: room_id.to_string(),
            updates,
            host_requests,
            guard: SubscriptionGuard {
                notifier: self.clone(),
                room_id: room_id.to_string(),
                generation: subscription_generation,
            },
        }
    }

    /// Deliver a committed room snapshot to every subscriber of that room
    pub fn publish(&self, room: &Room) {
        let registry = self.lock();
        if let Some(channels) = registry.rooms.get(&room.room_id) {
            // No receivers left is fine, the guard will clean up shortly
            let _ = channels.updates.send(room.clone());
        }
    }

    /// Hand a guest's action to the room's host subscriber
    pub fn forward(&self, request: ForwardedAction) -> Result<(), RoomError> {
        let registry = self.lock();
        let channels = registry
            .rooms
            .get(&request.room_id)
            .filter(|c| c.host_requests.receiver_count() > 0)
            .ok_or_else(|| RoomError::HostUnavailable(request.room_id.clone()))?;

        channels
            .host_requests
            .send(request.clone())
            .map(|_| ())
            .map_err(|_| RoomError::HostUnavailable(request.room_id))
    }

    /// Drop a room's channels; receivers observe the channel closing
    pub fn close_room(&self, room_id: &str) {
        if self.lock().rooms.remove(room_id).is_some() {
            tracing::debug!(room_id, "Closed room channels");
        }
    }

    fn release(&self, room_id: &str, generation: u64) {
        let mut registry = self.lock();
        let remove = match registry.rooms.get_mut(room_id) {
            Some(channels) if channels.generation == generation => {
                channels.subscribers = channels.subscribers.saturating_sub(1);
                channels.subscribers == 0
            }
            _ => false,
        };
        if remove {
            registry.rooms.remove(room_id);
            tracing::debug!(room_id, "Last subscriber left, removed room channels");
        }
    }

    pub fn subscriber_count(&self, room_id: &str) -> usize {
        self.lock()
            .rooms
            .get(room_id)
            .map(|c| c.subscribers)
            .unwrap_or(0)
    }

    /// Number of rooms with at least one live subscription
    pub fn room_count(&self) -> usize {
        self.lock().rooms.len()
    }
}

/// Receive from an optional channel; without one, wait forever
pub async fn recv_or_pending<T: Clone>(
    rx: &mut Option<broadcast::Receiver<T>>,
) -> Result<T, broadcast::error::RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PlayerAction;

    fn room(id: &str, version: u64) -> Room {
        let mut room = Room::new(id.to_string(), "host".to_string());
        room.version = version;
        room
    }

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers_in_order() {
        let notifier = ChangeNotifier::default();
        let mut a = notifier.subscribe("AB12", false);
        let mut b = notifier.subscribe("AB12", true);

        for v in 1..=3 {
            notifier.publish(&room("AB12", v));
        }

        for sub in [&mut a, &mut b] {
            for v in 1..=3 {
                assert_eq!(sub.updates.recv().await.unwrap().version, v);
            }
        }
    }

    #[tokio::test]
    async fn test_publish_is_scoped_to_room() {
        let notifier = ChangeNotifier::default();
        let mut other = notifier.subscribe("ZZZZ", false);

        notifier.publish(&room("AB12", 1));
        assert!(other.updates.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_forward_requires_host_subscriber() {
        let notifier = ChangeNotifier::default();
        let request = ForwardedAction {
            room_id: "AB12".to_string(),
            from: "guest".to_string(),
            action: PlayerAction::DrawQuestion,
        };

        let _guest = notifier.subscribe("AB12", false);
        assert_eq!(
            notifier.forward(request.clone()),
            Err(RoomError::HostUnavailable("AB12".to_string()))
        );

        let mut host = notifier.subscribe("AB12", true);
        notifier.forward(request.clone()).unwrap();
        let received = host.host_requests.as_mut().unwrap().recv().await.unwrap();
        assert_eq!(received, request);
    }

    #[test]
    fn test_registry_entry_removed_with_last_guard() {
        let notifier = ChangeNotifier::default();
        let a = notifier.subscribe("AB12", false);
        let b = notifier.subscribe("AB12", false);
        assert_eq!(notifier.subscriber_count("AB12"), 2);

        drop(a);
        assert_eq!(notifier.subscriber_count("AB12"), 1);
        drop(b);
        assert_eq!(notifier.room_count(), 0);
    }

    #[tokio::test]
    async fn test_close_room_closes_receivers() {
        let notifier = ChangeNotifier::default();
        let mut sub = notifier.subscribe("AB12", false);

        notifier.close_room("AB12");
        assert!(matches!(
            sub.updates.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }

    #[test]
    fn test_stale_guard_does_not_release_new_generation() {
        let notifier = ChangeNotifier::default();
        let old = notifier.subscribe("AB12", false);
        notifier.close_room("AB12");

        let _new = notifier.subscribe("AB12", false);
        drop(old);
        assert_eq!(notifier.subscriber_count("AB12"), 1);
    }
}
