//! Client error types.

use std::time::Duration;

use pandablocks_protocol::{CommandError, ScheduleError};
use thiserror::Error;

/// Errors raised by the clients.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no reply from the device within {0:?}")]
    Timeout(Duration),

    #[error("connection closed by the device")]
    Disconnected,

    #[error("connection unusable after an earlier failed round trip")]
    ConnectionBroken,

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_yaml::Error),
}

impl From<ScheduleError<ClientError>> for ClientError {
    fn from(err: ScheduleError<ClientError>) -> Self {
        match err {
            ScheduleError::Command(e) => ClientError::Command(e),
            ScheduleError::Transport(e) => e,
        }
    }
}

/// Result type alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;
