//! WebSocket transport to a remote room server.
//!
//! One connection carries both directions: requests are matched to replies
//! by request id, pushed messages are handed to the active feed.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::transport::{ChangeFeed, FeedEvent, RoomTransport, FEED_BUFFER};
use crate::error::{RoomError, RoomResult};
use crate::protocol::{ClientEnvelope, ClientMessage, ServerMessage};
use crate::types::*;

type PendingReplies = Arc<Mutex<HashMap<u64, oneshot::Sender<ServerMessage>>>>;
type FeedSender = Arc<Mutex<Option<mpsc::Sender<FeedEvent>>>>;

pub struct WsTransport {
    outgoing: mpsc::UnboundedSender<String>,
    pending: PendingReplies,
    feed: FeedSender,
    next_req: AtomicU64,
    tasks: Vec<JoinHandle<()>>,
}

fn connection_lost() -> RoomError {
    RoomError::StoreUnavailable("Connection to room server lost".to_string())
}

impl WsTransport {
    /// Connect to a room server's `/ws` endpoint
    pub async fn connect(url: &str) -> RoomResult<Self> {
        let (stream, _) = connect_async(url).await.map_err(|e| {
            RoomError::StoreUnavailable(format!("Cannot connect to {}: {}", url, e))
        })?;
        tracing::info!(url, "Connected to room server");

        let (mut sink, mut stream) = stream.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<String>();
        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));
        let feed: FeedSender = Arc::new(Mutex::new(None));

        let writer = tokio::spawn(async move {
            while let Some(text) = outgoing_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    tracing::error!("Failed to send to room server: {}", e);
                    break;
                }
            }
        });

        let reader = {
            let pending = pending.clone();
            let feed = feed.clone();
            tokio::spawn(async move {
                while let Some(msg) = stream.next().await {
                    match msg {
                        Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                            Ok(msg) => route_message(msg, &pending, &feed).await,
                            Err(e) => tracing::warn!("Unparseable server message: {}", e),
                        },
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!("WebSocket error: {}", e);
                            break;
                        }
                    }
                }

                tracing::warn!("Room server connection closed");
                // Dropping the senders fails every outstanding request
                lock(&pending).clear();
                lock(&feed).take();
            })
        };

        Ok(Self {
            outgoing,
            pending,
            feed,
            next_req: AtomicU64::new(1),
            tasks: vec![writer, reader],
        })
    }

    async fn request(&self, msg: ClientMessage) -> RoomResult<ServerMessage> {
        let req = self.next_req.fetch_add(1, Ordering::Relaxed);
        let json = serde_json::to_string(&ClientEnvelope { req, msg })
            .map_err(|e| RoomError::StoreUnavailable(format!("Cannot encode request: {}", e)))?;

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(req, tx);

        if self.outgoing.send(json).is_err() {
            lock(&self.pending).remove(&req);
            return Err(connection_lost());
        }

        match rx.await.map_err(|_| connection_lost())? {
            ServerMessage::Error { code, msg, .. } => Err(RoomError::from_wire(&code, msg)),
            reply => Ok(reply),
        }
    }

    async fn request_room(&self, msg: ClientMessage) -> RoomResult<Room> {
        match self.request(msg).await? {
            ServerMessage::Room { room, .. } => Ok(room),
            other => Err(RoomError::StoreUnavailable(format!(
                "Unexpected reply: {:?}",
                other
            ))),
        }
    }

    async fn request_ack(&self, msg: ClientMessage) -> RoomResult<()> {
        match self.request(msg).await? {
            ServerMessage::Ack { .. } => Ok(()),
            other => Err(RoomError::StoreUnavailable(format!(
                "Unexpected reply: {:?}",
                other
            ))),
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

async fn route_message(msg: ServerMessage, pending: &PendingReplies, feed: &FeedSender) {
    if let Some(req) = msg.req() {
        match lock(pending).remove(&req) {
            Some(waiter) => {
                let _ = waiter.send(msg);
            }
            None => tracing::debug!(req, "Reply for a request nobody waits for"),
        }
        return;
    }

    let event = match msg {
        ServerMessage::UpdateState { room } => FeedEvent::Update(room),
        ServerMessage::ForwardedAction {
            room_id,
            from,
            action,
        } => FeedEvent::Forwarded(ForwardedAction {
            room_id,
            from,
            action,
        }),
        ServerMessage::RoomClosed { room_id } => FeedEvent::RoomClosed(room_id),
        ServerMessage::Welcome { protocol, .. } => {
            tracing::debug!(protocol = %protocol, "Server welcome");
            return;
        }
        ServerMessage::Error { code, msg, .. } => {
            tracing::warn!(code = %code, "Server error: {}", msg);
            return;
        }
        ServerMessage::Room { .. } | ServerMessage::Ack { .. } => return,
    };

    // Clone the sender out so the lock is not held across the send
    let sender = lock(feed).clone();
    if let Some(sender) = sender {
        if sender.send(event).await.is_err() {
            tracing::debug!("Feed receiver dropped");
        }
    }
}

#[async_trait]
impl RoomTransport for WsTransport {
    async fn create_room(&self) -> RoomResult<Room> {
        self.request_room(ClientMessage::CreateRoom).await
    }

    async fn get_room(&self, room_id: &str) -> RoomResult<Room> {
        self.request_room(ClientMessage::GetRoom {
            room_id: room_id.to_string(),
        })
        .await
    }

    async fn join_room(&self, room_id: &str) -> RoomResult<Room> {
        self.request_room(ClientMessage::JoinRoom {
            room_id: room_id.to_string(),
        })
        .await
    }

    async fn leave_room(&self, room_id: &str) -> RoomResult<Room> {
        self.request_room(ClientMessage::LeaveRoom {
            room_id: room_id.to_string(),
        })
        .await
    }

    async fn execute(
        &self,
        room_id: &str,
        participant_id: &str,
        action: PlayerAction,
    ) -> RoomResult<()> {
        self.request_ack(ClientMessage::Execute {
            room_id: room_id.to_string(),
            participant_id: participant_id.to_string(),
            action,
        })
        .await
    }

    async fn forward(
        &self,
        room_id: &str,
        participant_id: &str,
        action: PlayerAction,
    ) -> RoomResult<()> {
        self.request_ack(ClientMessage::Forward {
            room_id: room_id.to_string(),
            participant_id: participant_id.to_string(),
            action,
        })
        .await
    }
}

#[async_trait]
impl ChangeFeed for WsTransport {
    async fn subscribe(
        &self,
        room_id: &str,
        participant_id: &str,
    ) -> RoomResult<mpsc::Receiver<FeedEvent>> {
        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        // Install the sender first so no update after the ack is missed
        lock(&self.feed).replace(tx);

        let result = self
            .request_ack(ClientMessage::Subscribe {
                room_id: room_id.to_string(),
                participant_id: participant_id.to_string(),
            })
            .await;
        if let Err(e) = result {
            lock(&self.feed).take();
            return Err(e);
        }
        Ok(rx)
    }

    async fn unsubscribe(&self) {
        lock(&self.feed).take();
        if let Err(e) = self.request_ack(ClientMessage::Unsubscribe).await {
            tracing::debug!("Unsubscribe failed: {}", e);
        }
    }
}
