use crate::state::AppState;
use std::sync::Arc;
use std::time::Duration;

/// Spawn a background task that deletes rooms idle for longer than `ttl`.
///
/// Best-effort leaves on exit can be lost, so abandoned rooms are only ever
/// cleaned up here.
pub fn spawn_room_reaper(
    state: Arc<AppState>,
    ttl: Duration,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;

            let reaped = state.reap_idle_rooms(ttl).await;
            if !reaped.is_empty() {
                tracing::info!(count = reaped.len(), rooms = ?reaped, "Reaped idle rooms");
            }
        }
    })
}
