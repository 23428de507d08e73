//! One participant's view of one room.
//!
//! `RoomSession` owns the reducer state and the feed pump. Actions never touch
//! local state directly: they go to the store (or to the host), and the
//! resulting commit comes back through the change feed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use super::dispatch::{plan_action, Dispatch};
use super::identity::{IdentityCache, SavedIdentity};
use super::reducer::{SessionAction, SessionState, SessionView};
use super::transport::{ChangeFeed, FeedEvent, RoomTransport};
use crate::config::ClientConfig;
use crate::error::{RoomError, RoomResult};
use crate::types::*;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Upper bound for every transport call
    pub request_timeout: Duration,
    /// Extra attempts for reads during recovery; writes are never retried
    pub read_retries: u32,
    pub retry_backoff: Duration,
    /// How long a best-effort leave may take on shutdown
    pub exit_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            read_retries: 3,
            retry_backoff: Duration::from_millis(200),
            exit_timeout: Duration::from_secs(1),
        }
    }
}

impl From<&ClientConfig> for SessionConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            request_timeout: config.request_timeout,
            ..Self::default()
        }
    }
}

struct Shared {
    state: RwLock<SessionState>,
    views: watch::Sender<SessionView>,
    transport: Arc<dyn RoomTransport>,
    identity: Arc<dyn IdentityCache>,
    config: SessionConfig,
}

impl Shared {
    async fn dispatch(&self, action: SessionAction) {
        let mut state = self.state.write().await;
        let next = std::mem::take(&mut *state).reduce(action);
        self.views.send_replace(next.view());
        *state = next;
    }

    async fn snapshot(&self) -> SessionState {
        self.state.read().await.clone()
    }

    async fn call<T>(&self, fut: impl Future<Output = RoomResult<T>>) -> RoomResult<T> {
        tokio::time::timeout(self.config.request_timeout, fut)
            .await
            .map_err(|_| RoomError::StoreUnavailable("Request timed out".to_string()))?
    }

    /// Run a guest's action against the store on their behalf
    async fn execute_forwarded(self: Arc<Self>, forwarded: ForwardedAction) {
        let state = self.snapshot().await;
        let (Some(room), Some(host_id)) = (&state.room, &state.participant_id) else {
            return;
        };
        if room.room_id != forwarded.room_id || !room.is_host(host_id) {
            tracing::debug!(room_id = %forwarded.room_id, "Dropping forwarded action, not host here");
            return;
        }

        let name = forwarded.action.name();
        let result = self
            .call(
                self.transport
                    .execute(&forwarded.room_id, host_id, forwarded.action),
            )
            .await;
        match result {
            Ok(()) => tracing::debug!(
                room_id = %forwarded.room_id,
                from = %forwarded.from,
                action = name,
                "Executed forwarded action"
            ),
            Err(e) => tracing::warn!(
                room_id = %forwarded.room_id,
                from = %forwarded.from,
                action = name,
                "Forwarded action rejected: {}",
                e
            ),
        }
    }
}

/// Fold feed events into the session until the feed ends or the room closes
async fn run_feed_pump(shared: Arc<Shared>, mut events: mpsc::Receiver<FeedEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            FeedEvent::Update(room) => {
                shared
                    .dispatch(SessionAction::UpdateState(room.into()))
                    .await;
            }
            FeedEvent::Forwarded(forwarded) => {
                // Executing inline would wait on a reply that may be queued
                // behind this very feed
                tokio::spawn(shared.clone().execute_forwarded(forwarded));
            }
            FeedEvent::RoomClosed(room_id) => {
                let current = shared.snapshot().await.room.map(|r| r.room_id);
                if current.as_deref() == Some(room_id.as_str()) {
                    tracing::info!(room_id = %room_id, "Room closed");
                    shared.dispatch(SessionAction::LeaveGame).await;
                    shared.identity.clear();
                }
                break;
            }
        }
    }
}

pub struct RoomSession {
    shared: Arc<Shared>,
    feed: Arc<dyn ChangeFeed>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl RoomSession {
    pub fn new(
        transport: Arc<dyn RoomTransport>,
        feed: Arc<dyn ChangeFeed>,
        identity: Arc<dyn IdentityCache>,
        config: SessionConfig,
    ) -> Self {
        let (views, _) = watch::channel(SessionState::default().view());
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(SessionState::default()),
                views,
                transport,
                identity,
                config,
            }),
            feed,
            pump: Mutex::new(None),
        }
    }

    pub fn view(&self) -> SessionView {
        self.shared.views.borrow().clone()
    }

    /// Receiver that sees every view change
    pub fn watch(&self) -> watch::Receiver<SessionView> {
        self.shared.views.subscribe()
    }

    pub async fn state(&self) -> SessionState {
        self.shared.snapshot().await
    }

    pub async fn create_room(&self) -> RoomResult<RoomId> {
        self.leave_previous().await;

        let shared = &self.shared;
        let room = shared.call(shared.transport.create_room()).await?;
        let host_id = room
            .host_id
            .clone()
            .ok_or_else(|| RoomError::StoreUnavailable("Created room has no host".to_string()))?;
        let room_id = room.room_id.clone();

        shared
            .dispatch(SessionAction::CreateRoom {
                room_id: room_id.clone(),
                host_id: host_id.clone(),
            })
            .await;
        shared.dispatch(SessionAction::JoinRoom(room)).await;
        tracing::info!(room_id = %room_id, "Created room");

        self.remember(&room_id, &host_id);
        self.enter(&room_id, &host_id).await?;
        Ok(room_id)
    }

    pub async fn join_room(&self, code: &str) -> RoomResult<RoomId> {
        let room_id = normalize_room_code(code)?;
        self.leave_previous().await;

        let shared = &self.shared;
        let room = shared.call(shared.transport.join_room(&room_id)).await?;
        let participant_id = new_participant_id();

        shared.dispatch(SessionAction::JoinRoom(room)).await;
        shared
            .dispatch(SessionAction::SetClientId(participant_id.clone()))
            .await;
        tracing::info!(room_id = %room_id, "Joined room");

        self.remember(&room_id, &participant_id);
        self.enter(&room_id, &participant_id).await?;
        Ok(room_id)
    }

    /// Send an action to the store, directly as host or through the host.
    /// The resulting state arrives through the change feed.
    pub async fn send_player_action(&self, action: PlayerAction) -> RoomResult<()> {
        let state = self.shared.snapshot().await;
        let plan = plan_action(&state, action)?;
        let transport = &self.shared.transport;

        tracing::debug!(
            room_id = %plan.room_id,
            action = plan.action.name(),
            dispatch = ?plan.dispatch,
            "Sending action"
        );
        match plan.dispatch {
            Dispatch::HostExecute => {
                self.shared
                    .call(transport.execute(&plan.room_id, &plan.participant_id, plan.action))
                    .await
            }
            Dispatch::ForwardToHost => {
                self.shared
                    .call(transport.forward(&plan.room_id, &plan.participant_id, plan.action))
                    .await
            }
        }
    }

    pub async fn submit_question(&self, text: &str) -> RoomResult<()> {
        self.send_player_action(PlayerAction::SubmitQuestion(text.trim().to_string()))
            .await
    }

    pub async fn start_game(&self) -> RoomResult<()> {
        self.send_player_action(PlayerAction::StartGame).await
    }

    pub async fn draw_question(&self) -> RoomResult<()> {
        self.send_player_action(PlayerAction::DrawQuestion).await
    }

    /// Leave the current room. Local state is reset even if the store call
    /// fails.
    pub async fn leave_room(&self) -> RoomResult<()> {
        let room_id = self
            .shared
            .snapshot()
            .await
            .room
            .map(|r| r.room_id)
            .ok_or_else(|| RoomError::InvariantViolation("Not in a room".to_string()))?;

        self.exit_room(&room_id).await
    }

    /// Restore the room remembered in the identity cache.
    ///
    /// Only reads the room, so the player count is not bumped a second time.
    /// Returns whether a room was restored.
    pub async fn recover(&self) -> RoomResult<bool> {
        let Some(saved) = self.shared.identity.load() else {
            return Ok(false);
        };

        let room = match self.read_room_with_retry(&saved.room_id).await {
            Ok(room) => room,
            Err(RoomError::NotFound(_)) => {
                tracing::info!(room_id = %saved.room_id, "Remembered room is gone");
                self.shared.identity.clear();
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        self.detach().await;
        self.shared.dispatch(SessionAction::JoinRoom(room)).await;
        self.shared
            .dispatch(SessionAction::SetClientId(saved.participant_id.clone()))
            .await;

        match self.attach(&saved.room_id, &saved.participant_id).await {
            Ok(()) => {
                tracing::info!(room_id = %saved.room_id, "Recovered session");
                Ok(true)
            }
            Err(RoomError::NotFound(_)) => Ok(false),
            Err(e) => {
                // Keep the identity so recovery can be tried again
                self.shared.dispatch(SessionAction::LeaveGame).await;
                Err(e)
            }
        }
    }

    /// Best-effort leave on exit. Failures are logged, never returned.
    pub async fn shutdown(&self) {
        let Some(room) = self.shared.snapshot().await.room else {
            return;
        };
        self.detach().await;

        let leave = self.shared.transport.leave_room(&room.room_id);
        match tokio::time::timeout(self.shared.config.exit_timeout, leave).await {
            Ok(Ok(_)) => tracing::info!(room_id = %room.room_id, "Left room on shutdown"),
            Ok(Err(e)) => tracing::warn!(room_id = %room.room_id, "Leave on shutdown failed: {}", e),
            Err(_) => tracing::warn!(room_id = %room.room_id, "Leave on shutdown timed out"),
        }
        self.shared.dispatch(SessionAction::LeaveGame).await;
    }

    async fn read_room_with_retry(&self, room_id: &str) -> RoomResult<Room> {
        let shared = &self.shared;
        let mut attempt = 0;
        loop {
            match shared.call(shared.transport.get_room(room_id)).await {
                Err(e) if e.is_transient() && attempt < shared.config.read_retries => {
                    attempt += 1;
                    tracing::debug!(room_id, attempt, "Room read failed, retrying: {}", e);
                    tokio::time::sleep(shared.config.retry_backoff * attempt).await;
                }
                result => return result,
            }
        }
    }

    fn remember(&self, room_id: &str, participant_id: &str) {
        let identity = SavedIdentity {
            room_id: room_id.to_string(),
            participant_id: participant_id.to_string(),
        };
        if let Err(e) = self.shared.identity.save(&identity) {
            tracing::warn!(room_id, "Cannot remember session: {}", e);
        }
    }

    /// Leave the room this session is in, if any, before entering another
    async fn leave_previous(&self) {
        let Some(room) = self.shared.snapshot().await.room else {
            return;
        };
        match self.exit_room(&room.room_id).await {
            Ok(()) | Err(RoomError::NotFound(_)) => {}
            Err(e) => tracing::warn!(room_id = %room.room_id, "Leaving previous room failed: {}", e),
        }
    }

    async fn exit_room(&self, room_id: &str) -> RoomResult<()> {
        self.detach().await;
        let result = self
            .shared
            .call(self.shared.transport.leave_room(room_id))
            .await;

        self.shared.dispatch(SessionAction::LeaveGame).await;
        self.shared.identity.clear();
        tracing::info!(room_id, "Left room");
        result.map(|_| ())
    }

    /// Attach to a room just created or joined. If that fails the room is
    /// left again, so the caller can simply retry.
    async fn enter(&self, room_id: &str, participant_id: &str) -> RoomResult<()> {
        match self.attach(room_id, participant_id).await {
            Ok(()) => Ok(()),
            Err(e @ RoomError::NotFound(_)) => Err(e),
            Err(e) => {
                if let Err(leave_err) = self.exit_room(room_id).await {
                    tracing::warn!(room_id, "Leaving after failed subscribe failed: {}", leave_err);
                }
                Err(e)
            }
        }
    }

    /// Subscribe to the room and start folding its updates.
    ///
    /// A room that is gone by the time of the subscription or the resync
    /// resets the session the same way a closed feed does, and yields
    /// `NotFound`.
    async fn attach(&self, room_id: &str, participant_id: &str) -> RoomResult<()> {
        let shared = &self.shared;
        let events = match shared.call(self.feed.subscribe(room_id, participant_id)).await {
            Ok(events) => events,
            Err(RoomError::NotFound(e)) => return Err(self.room_gone(room_id, e).await),
            Err(e) => {
                tracing::warn!(room_id, "Cannot subscribe to room updates: {}", e);
                return Err(e);
            }
        };

        let pump = tokio::spawn(run_feed_pump(shared.clone(), events));
        if let Some(previous) = self.pump.lock().await.replace(pump) {
            previous.abort();
        }

        // Anything committed between the initial read and the subscription
        // is picked up here; stale versions are ignored by the reducer
        match shared.call(shared.transport.get_room(room_id)).await {
            Ok(room) => shared.dispatch(SessionAction::UpdateState(room.into())).await,
            Err(RoomError::NotFound(e)) => return Err(self.room_gone(room_id, e).await),
            Err(e) => tracing::debug!(room_id, "Resync after subscribe failed: {}", e),
        }
        Ok(())
    }

    async fn room_gone(&self, room_id: &str, detail: String) -> RoomError {
        tracing::info!(room_id, "Room closed before the session could follow it");
        self.detach().await;
        self.shared.dispatch(SessionAction::LeaveGame).await;
        self.shared.identity.clear();
        RoomError::NotFound(detail)
    }

    async fn detach(&self) {
        let pump = self.pump.lock().await.take();
        if let Some(pump) = pump {
            pump.abort();
            self.feed.unsubscribe().await;
        }
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.get_mut().take() {
            pump.abort();
        }
    }
}
