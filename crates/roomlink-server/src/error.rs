//! Server error types.

use std::fmt;

/// Errors that can occur in the server.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error
    Config(String),

    /// Transport/network error
    Transport(String),

    /// A room actor stopped before answering
    RoomUnavailable(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {}", msg),
            Self::Transport(msg) => write!(f, "transport error: {}", msg),
            Self::RoomUnavailable(code) => write!(f, "room {} is unavailable", code),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<roomlink_core::AuthError> for ServerError {
    fn from(err: roomlink_core::AuthError) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_become_transport_errors() {
        let err: ServerError = std::io::Error::new(std::io::ErrorKind::AddrInUse, "taken").into();
        assert!(matches!(err, ServerError::Transport(_)));
        assert_eq!(err.to_string(), "transport error: taken");
    }

    #[test]
    fn auth_errors_become_config_errors() {
        let err: ServerError = roomlink_core::AuthError::Missing.into();
        assert!(matches!(err, ServerError::Config(_)));
        assert_eq!(
            ServerError::RoomUnavailable("123456".to_string()).to_string(),
            "room 123456 is unavailable"
        );
    }
}
