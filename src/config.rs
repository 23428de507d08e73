//! Environment configuration for the server and the client.
//!
//! Unset variables fall back to defaults; set-but-invalid variables are a
//! `RoomError::Configuration` so a typo never silently becomes a default.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::RoomError;
use crate::notifier::DEFAULT_CHANNEL_CAPACITY;

/// Load a `.env` file if present (before any env var reads)
pub fn load_dotenv() {
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }
}

fn env_trimmed(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_parse<T: FromStr>(name: &str, default: T) -> Result<T, RoomError> {
    match env_trimmed(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| RoomError::Configuration(format!("{} has invalid value {:?}", name, raw))),
        None => Ok(default),
    }
}

/// Limits applied by the room store
#[derive(Debug, Clone)]
pub struct RoomLimits {
    pub max_question_chars: usize,
}

impl Default for RoomLimits {
    fn default() -> Self {
        Self {
            max_question_chars: 500,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Idle rooms older than this are reaped
    pub room_ttl: Duration,
    pub reaper_interval: Duration,
    pub limits: RoomLimits,
    pub broadcast_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8787)),
            room_ttl: Duration::from_secs(6 * 60 * 60),
            reaper_interval: Duration::from_secs(60),
            limits: RoomLimits::default(),
            broadcast_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Load server config from environment variables
    pub fn from_env() -> Result<Self, RoomError> {
        let defaults = Self::default();

        let room_ttl_secs = env_parse("TRUTHROOM_ROOM_TTL_SECS", defaults.room_ttl.as_secs())?;
        let reaper_secs = env_parse(
            "TRUTHROOM_REAPER_INTERVAL_SECS",
            defaults.reaper_interval.as_secs(),
        )?;
        if room_ttl_secs == 0 || reaper_secs == 0 {
            return Err(RoomError::Configuration(
                "TRUTHROOM_ROOM_TTL_SECS and TRUTHROOM_REAPER_INTERVAL_SECS must be positive"
                    .to_string(),
            ));
        }

        let config = Self {
            bind_addr: env_parse("TRUTHROOM_BIND_ADDR", defaults.bind_addr)?,
            room_ttl: Duration::from_secs(room_ttl_secs),
            reaper_interval: Duration::from_secs(reaper_secs),
            limits: RoomLimits {
                max_question_chars: env_parse(
                    "TRUTHROOM_MAX_QUESTION_CHARS",
                    defaults.limits.max_question_chars,
                )?,
            },
            broadcast_capacity: env_parse(
                "TRUTHROOM_BROADCAST_CAPACITY",
                defaults.broadcast_capacity,
            )?,
        };

        tracing::info!(
            bind_addr = %config.bind_addr,
            room_ttl_secs,
            reaper_secs,
            "Server config loaded"
        );
        Ok(config)
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint of the room server, e.g. ws://localhost:8787/ws
    pub server_url: String,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    /// Where the local identity is remembered between runs
    pub identity_file: PathBuf,
}

impl ClientConfig {
    /// Load client config from environment variables.
    /// TRUTHROOM_SERVER_URL is required.
    pub fn from_env() -> Result<Self, RoomError> {
        let server_url = env_trimmed("TRUTHROOM_SERVER_URL").ok_or_else(|| {
            RoomError::Configuration(
                "TRUTHROOM_SERVER_URL is not set (expected e.g. ws://localhost:8787/ws)"
                    .to_string(),
            )
        })?;
        if !(server_url.starts_with("ws://") || server_url.starts_with("wss://")) {
            return Err(RoomError::Configuration(format!(
                "TRUTHROOM_SERVER_URL must start with ws:// or wss://, got {:?}",
                server_url
            )));
        }

        let timeout_ms: u64 = env_parse("TRUTHROOM_REQUEST_TIMEOUT_MS", 5_000)?;
        let poll_ms: u64 = env_parse("TRUTHROOM_POLL_INTERVAL_MS", 3_000)?;
        let identity_file = env_trimmed("TRUTHROOM_IDENTITY_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".truthroom-session.json"));

        Ok(Self {
            server_url,
            request_timeout: Duration::from_millis(timeout_ms),
            poll_interval: Duration::from_millis(poll_ms),
            identity_file,
        })
    }
}
