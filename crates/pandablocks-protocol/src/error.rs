//! Error types for the control protocol.

use thiserror::Error;

/// Errors raised while running a [`Command`](crate::Command).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// The device acknowledged a command with something other than the
    /// expected reply (missing `OK =` prefix, `ERR ...`, unparseable line).
    #[error("{command} -> {response}")]
    MalformedResponse {
        /// The command that was sent, rendered for display.
        command: String,
        /// The reply that was received.
        response: String,
    },

    /// The transport returned a response batch of a different size than the
    /// request batch. The connection can no longer be trusted.
    #[error("response batch has {actual} entries, expected {expected}")]
    SchedulerShapeViolation {
        /// Number of exchanges that were sent.
        expected: usize,
        /// Number of responses that came back.
        actual: usize,
    },

    /// A command was resumed with a different number of responses than it
    /// asked for.
    #[error("{context}: got {actual} responses, expected {expected}")]
    ResponseCountMismatch {
        /// Which command or sub-computation was resumed.
        context: String,
        /// Number of responses it asked for.
        expected: usize,
        /// Number of responses it was given.
        actual: usize,
    },

    /// An exchange was read before the transport filled it in.
    #[error("exchange {0:?} read before it was serviced")]
    NotServiced(Vec<String>),

    /// An exchange was filled in twice.
    #[error("exchange {0:?} serviced twice")]
    AlreadyServiced(Vec<String>),

    /// A single line reply was expected but a multiline block arrived.
    #[error("expected a single line reply to {0:?}, got a multiline block")]
    ExpectedLine(Vec<String>),

    /// A multiline block was expected but a single line arrived.
    #[error("expected a multiline reply to {request:?}, got {line:?}")]
    ExpectedLines {
        /// The lines that were sent.
        request: Vec<String>,
        /// The single line that was received instead.
        line: String,
    },

    /// A numeric attribute could not be parsed.
    #[error("invalid number {value:?} for {field}")]
    InvalidNumber {
        /// The attribute being parsed.
        field: String,
        /// The text the device sent.
        value: String,
    },

    /// A finished command was resumed again.
    #[error("{0} resumed after it completed")]
    ResumedAfterCompletion(&'static str),

    /// The device sent a line that is not valid UTF-8, shown here with the
    /// invalid bytes replaced.
    #[error("reply line is not valid UTF-8: {0:?}")]
    InvalidUtf8(String),

    /// The codec received a line while no reply was outstanding.
    #[error("unexpected line with no request outstanding: {0:?}")]
    UnexpectedLine(String),
}

impl CommandError {
    /// Build a [`CommandError::MalformedResponse`].
    pub fn malformed(command: impl std::fmt::Display, response: impl std::fmt::Display) -> Self {
        CommandError::MalformedResponse {
            command: command.to_string(),
            response: response.to_string(),
        }
    }
}

/// Result type alias for command operations.
pub type CommandResult<T> = Result<T, CommandError>;

/// Errors returned when executing commands through a [`Transport`](crate::Transport).
#[derive(Debug, Error)]
pub enum ScheduleError<E> {
    /// A command failed or the batch shape was violated.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// The transport failed to deliver the batch.
    #[error("transport error: {0}")]
    Transport(E),
}
