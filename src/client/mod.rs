//! Room session client: local mirror of a room plus the transports that keep
//! it in sync with the server.

pub mod dispatch;
pub mod identity;
pub mod local;
pub mod polling;
pub mod reducer;
pub mod session;
pub mod transport;
pub mod ws;

pub use dispatch::{plan_action, ActionPlan, Dispatch};
pub use identity::{FileIdentityCache, IdentityCache, MemoryIdentityCache, SavedIdentity};
pub use local::LocalTransport;
pub use polling::PollingFeed;
pub use reducer::{RoomPatch, SessionAction, SessionState, SessionStatus, SessionView};
pub use session::{RoomSession, SessionConfig};
pub use transport::{ChangeFeed, FeedEvent, RoomTransport};
pub use ws::WsTransport;
