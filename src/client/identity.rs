//! Remembers which room this client was in, so a restart can rejoin it.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::{RoomError, RoomResult};
use crate::types::{ParticipantId, RoomId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SavedIdentity {
    pub room_id: RoomId,
    pub participant_id: ParticipantId,
}

pub trait IdentityCache: Send + Sync {
    fn save(&self, identity: &SavedIdentity) -> RoomResult<()>;

    /// A missing or unreadable identity is simply none
    fn load(&self) -> Option<SavedIdentity>;

    fn clear(&self);
}

/// JSON file on local disk
#[derive(Debug, Clone)]
pub struct FileIdentityCache {
    path: PathBuf,
}

impl FileIdentityCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl IdentityCache for FileIdentityCache {
    fn save(&self, identity: &SavedIdentity) -> RoomResult<()> {
        let json = serde_json::to_string_pretty(identity)
            .map_err(|e| RoomError::StoreUnavailable(format!("Cannot encode identity: {}", e)))?;
        std::fs::write(&self.path, json).map_err(|e| {
            RoomError::StoreUnavailable(format!(
                "Cannot write identity file {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    fn load(&self) -> Option<SavedIdentity> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "Cannot read identity file: {}", e);
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(identity) => Some(identity),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "Discarding corrupt identity file: {}", e);
                self.clear();
                None
            }
        }
    }

    fn clear(&self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), "Cannot remove identity file: {}", e);
            }
        }
    }
}

/// Process-local cache, for tests and embedded sessions
#[derive(Debug, Default)]
pub struct MemoryIdentityCache {
    identity: Mutex<Option<SavedIdentity>>,
}

impl MemoryIdentityCache {
    fn slot(&self) -> std::sync::MutexGuard<'_, Option<SavedIdentity>> {
        self.identity.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl IdentityCache for MemoryIdentityCache {
    fn save(&self, identity: &SavedIdentity) -> RoomResult<()> {
        *self.slot() = Some(identity.clone());
        Ok(())
    }

    fn load(&self) -> Option<SavedIdentity> {
        self.slot().clone()
    }

    fn clear(&self) {
        self.slot().take();
    }
}
