use std::fmt::Display;

use thiserror::Error;

/// Rejected user input. Raised before any state changes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("identity must not be empty")]
    EmptyIdentity,
    #[error("identity must be at most {max} characters, got {actual}")]
    IdentityTooLong { max: usize, actual: usize },
    #[error("identity '{0}' is reserved")]
    ReservedIdentity(String),
    #[error("message content must not be empty")]
    EmptyMessage,
    #[error("file is {actual} bytes, the limit is {max} bytes")]
    FileTooLarge { max: u64, actual: u64 },
    #[error("not connected")]
    NotConnected,
    #[error("a session is already active")]
    AlreadyConnected,
}

/// Every collaborator failure is folded into one of these at the engine
/// boundary. Capacity overflow and duplicates are not errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("history service error: {0}")]
    Fetch(String),
}

impl SyncError {
    pub fn transport(err: impl Display) -> Self {
        SyncError::Transport(err.to_string())
    }

    pub fn fetch(err: impl Display) -> Self {
        SyncError::Fetch(err.to_string())
    }

    pub fn is_user_visible(&self) -> bool {
        !matches!(self, SyncError::Fetch(_))
    }
}
