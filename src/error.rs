/// Result type for room operations
pub type RoomResult<T> = Result<T, RoomError>;

/// Errors that can occur anywhere between a session and the room store
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RoomError {
    #[error("Room {0} not found")]
    NotFound(String),

    #[error("Room store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Not allowed: {0}")]
    InvariantViolation(String),

    #[error("Invalid room code {0:?}: expected 4 characters A-Z or 0-9")]
    InvalidRoomCode(String),

    #[error("Only the host can do that")]
    NotHost,

    #[error("The host of room {0} is not connected")]
    HostUnavailable(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

impl RoomError {
    /// Stable code used on the wire
    pub fn code(&self) -> &'static str {
        match self {
            RoomError::NotFound(_) => "NOT_FOUND",
            RoomError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            RoomError::InvariantViolation(_) => "INVARIANT_VIOLATION",
            RoomError::InvalidRoomCode(_) => "INVALID_ROOM_CODE",
            RoomError::NotHost => "NOT_HOST",
            RoomError::HostUnavailable(_) => "HOST_UNAVAILABLE",
            RoomError::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }

    /// The detail carried by the error, as sent in `ServerMessage::Error`
    pub fn detail(&self) -> String {
        match self {
            RoomError::NotFound(s)
            | RoomError::StoreUnavailable(s)
            | RoomError::InvariantViolation(s)
            | RoomError::InvalidRoomCode(s)
            | RoomError::HostUnavailable(s)
            | RoomError::Configuration(s) => s.clone(),
            RoomError::NotHost => String::new(),
        }
    }

    /// Rebuild an error received from the server
    pub fn from_wire(code: &str, msg: String) -> Self {
        match code {
            "NOT_FOUND" => RoomError::NotFound(msg),
            "INVARIANT_VIOLATION" => RoomError::InvariantViolation(msg),
            "INVALID_ROOM_CODE" => RoomError::InvalidRoomCode(msg),
            "NOT_HOST" => RoomError::NotHost,
            "HOST_UNAVAILABLE" => RoomError::HostUnavailable(msg),
            "CONFIGURATION_ERROR" => RoomError::Configuration(msg),
            _ => RoomError::StoreUnavailable(format!("{}: {}", code, msg)),
        }
    }

    /// Transient errors that a read may retry
    pub fn is_transient(&self) -> bool {
        matches!(self, RoomError::StoreUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_round_trip_keeps_kind() {
        let errors = [
            RoomError::NotFound("AB12".into()),
            RoomError::InvariantViolation("too few players".into()),
            RoomError::InvalidRoomCode("AB".into()),
            RoomError::NotHost,
            RoomError::HostUnavailable("AB12".into()),
        ];
        for err in errors {
            assert_eq!(RoomError::from_wire(err.code(), err.detail()), err);
        }
    }

    #[test]
    fn test_unknown_codes_are_transient() {
        let err = RoomError::from_wire("PARSE_ERROR", "bad json".into());
        assert!(err.is_transient());
        assert!(!RoomError::NotFound("AB12".into()).is_transient());
    }
}
