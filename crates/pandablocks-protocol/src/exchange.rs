//! Request/response units exchanged with the control port.
//!
//! An [`Exchange`] is created by a command at a suspension point, filled in
//! by the transport, and consumed when the command is resumed.

use std::fmt;

use crate::error::{CommandError, CommandResult};

/// Check whether the server will interpret `cmd` as a table command.
///
/// Scans for the first of `?`, `=` or `<`; if `<` comes first the command
/// is a multiline one. Table puts must be terminated by a blank line and
/// table queries are answered with a `.`-terminated block.
pub fn is_multiline_command(cmd: &str) -> bool {
    cmd.chars().find(|c| matches!(c, '?' | '=' | '<')) == Some('<')
}

/// A reply from the device, as handed back by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// A single line reply such as `OK`, `OK =1` or `ERR ...`.
    Line(String),
    /// A multiline reply with the `!` prefixes and `.` terminator stripped.
    Lines(Vec<String>),
}

impl Response {
    /// Whether this reply was a multiline block.
    pub fn is_multiline(&self) -> bool {
        matches!(self, Response::Lines(_))
    }

    /// Flatten into the received lines.
    pub fn into_lines(self) -> Vec<String> {
        match self {
            Response::Line(line) => vec![line],
            Response::Lines(lines) => lines,
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Line(line) => write!(f, "{}", line),
            Response::Lines(lines) => write!(f, "{}", lines.join("\n")),
        }
    }
}

/// One pending request/response unit on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    to_send: Vec<String>,
    received: Option<Response>,
}

impl Exchange {
    /// An exchange sending a single line.
    pub fn new(line: impl Into<String>) -> Self {
        Exchange {
            to_send: vec![line.into()],
            received: None,
        }
    }

    /// An exchange sending several lines as one unit (table put).
    pub fn with_lines(lines: Vec<String>) -> Self {
        Exchange {
            to_send: lines,
            received: None,
        }
    }

    /// The lines to send.
    pub fn to_send(&self) -> &[String] {
        &self.to_send
    }

    /// Whether the transport has filled this exchange in.
    pub fn is_serviced(&self) -> bool {
        self.received.is_some()
    }

    /// Record the reply. Fails if the exchange was already serviced.
    pub fn fill(&mut self, response: Response) -> CommandResult<()> {
        if self.received.is_some() {
            return Err(CommandError::AlreadyServiced(self.to_send.clone()));
        }
        self.received = Some(response);
        Ok(())
    }

    /// The reply, failing if the exchange has not been serviced yet.
    pub fn received(&self) -> CommandResult<&Response> {
        self.received
            .as_ref()
            .ok_or_else(|| CommandError::NotServiced(self.to_send.clone()))
    }

    /// Whether the reply was a multiline block.
    pub fn is_multiline(&self) -> CommandResult<bool> {
        Ok(self.received()?.is_multiline())
    }

    /// The single reply line.
    pub fn line(&self) -> CommandResult<&str> {
        match self.received()? {
            Response::Line(line) => Ok(line),
            Response::Lines(_) => Err(CommandError::ExpectedLine(self.to_send.clone())),
        }
    }

    /// The lines of a multiline reply.
    pub fn lines(&self) -> CommandResult<&[String]> {
        match self.received()? {
            Response::Lines(lines) => Ok(lines),
            Response::Line(line) => Err(CommandError::ExpectedLines {
                request: self.to_send.clone(),
                line: line.clone(),
            }),
        }
    }

    /// Consume the exchange, returning its reply.
    pub fn into_response(self) -> CommandResult<Response> {
        self.received.ok_or(CommandError::NotServiced(self.to_send))
    }
}
