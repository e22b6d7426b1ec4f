//! The command contract and the single round trip commands.
//!
//! A [`Command`] is a resumable state machine. Each call to
//! [`Command::resume`] hands back the exchanges the previous call asked for,
//! now filled in, and the command either asks for more exchanges or
//! finishes with its output:
//!
//! ```text
//! resume([])          -> Send([Exchange("PCAP.ACTIVE?")])
//! resume([<OK =1>])   -> Done(Value::Scalar("1"))
//! ```

use crate::error::{CommandError, CommandResult};
use crate::exchange::{Exchange, Response};
use crate::responses::Value;

/// What a command wants next.
#[derive(Debug, Clone, PartialEq)]
pub enum Step<T> {
    /// These exchanges must be serviced before the command can continue.
    Send(Vec<Exchange>),
    /// The command has finished.
    Done(T),
}

/// A typed, resumable operation built from one or more exchanges.
pub trait Command {
    /// The result of the command.
    type Output;

    /// Advance the command.
    ///
    /// `received` holds the exchanges returned by the previous call, in the
    /// same order, filled in by the transport. It is empty on the first call.
    /// Once `Step::Done` has been returned the command must not be resumed.
    fn resume(&mut self, received: Vec<Exchange>) -> CommandResult<Step<Self::Output>>;
}

/// Progress of a command that needs exactly one round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum OneShot {
    #[default]
    Start,
    Awaiting,
    Finished,
}

/// Check that a command got back the number of exchanges it sent.
pub(crate) fn expect_count(
    context: impl Into<String>,
    received: &[Exchange],
    expected: usize,
) -> CommandResult<()> {
    if received.len() != expected {
        return Err(CommandError::ResponseCountMismatch {
            context: context.into(),
            expected,
            actual: received.len(),
        });
    }
    Ok(())
}

/// Take the single exchange a one-shot command sent.
pub(crate) fn take_one(context: &str, mut received: Vec<Exchange>) -> CommandResult<Exchange> {
    expect_count(context, &received, 1)?;
    Ok(received.remove(0))
}

/// Drive a one-shot command: send `request` first, then hand the reply to
/// `finish`.
fn one_shot<T>(
    state: &mut OneShot,
    name: &'static str,
    received: Vec<Exchange>,
    request: impl FnOnce() -> Exchange,
    finish: impl FnOnce(Exchange) -> CommandResult<T>,
) -> CommandResult<Step<T>> {
    match *state {
        OneShot::Start => {
            *state = OneShot::Awaiting;
            Ok(Step::Send(vec![request()]))
        }
        OneShot::Awaiting => {
            *state = OneShot::Finished;
            let ex = take_one(name, received)?;
            finish(ex).map(Step::Done)
        }
        OneShot::Finished => Err(CommandError::ResumedAfterCompletion(name)),
    }
}

/// Require a plain `OK` acknowledgement.
fn expect_ok(command: impl std::fmt::Display, ex: &Exchange) -> CommandResult<()> {
    match ex.received()? {
        Response::Line(line) if line == "OK" => Ok(()),
        other => Err(CommandError::malformed(command, other)),
    }
}

/// Send raw lines and return the raw reply lines.
///
/// ```text
/// Raw(["PCAP.ACTIVE?"]) -> ["OK =1"]
/// Raw(["SEQ1.TABLE<", "1", "1", "0", "0", ""]) -> ["OK"]
/// Raw(["SEQ1.TABLE?"]) -> ["1", "1", "0", "0"]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raw {
    lines: Vec<String>,
    state: OneShot,
}

impl Raw {
    /// A raw command sending `lines` verbatim.
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Raw {
            lines: lines.into_iter().map(Into::into).collect(),
            state: OneShot::Start,
        }
    }

    /// The lines this command sends.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

impl Command for Raw {
    type Output = Vec<String>;

    fn resume(&mut self, received: Vec<Exchange>) -> CommandResult<Step<Vec<String>>> {
        let lines = &self.lines;
        one_shot(
            &mut self.state,
            "Raw",
            received,
            || Exchange::with_lines(lines.clone()),
            |ex| Ok(ex.into_response()?.into_lines()),
        )
    }
}

/// Get the value of a field or star command.
///
/// ```text
/// Get("PCAP.ACTIVE") -> Scalar("1")
/// Get("SEQ1.TABLE") -> Lines(["1048576", "0", "1000", "1000"])
/// Get("*IDN") -> Scalar("PandA 1.1...")
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Get {
    field: String,
    state: OneShot,
}

impl Get {
    /// Query `field`; the trailing `?` is added when sending.
    pub fn new(field: impl Into<String>) -> Self {
        Get {
            field: field.into(),
            state: OneShot::Start,
        }
    }

    /// The field being queried.
    pub fn field(&self) -> &str {
        &self.field
    }
}

impl Command for Get {
    type Output = Value;

    fn resume(&mut self, received: Vec<Exchange>) -> CommandResult<Step<Value>> {
        let field = &self.field;
        one_shot(
            &mut self.state,
            "Get",
            received,
            || Exchange::new(format!("{}?", field)),
            |ex| match ex.into_response()? {
                Response::Lines(lines) => Ok(Value::Lines(lines)),
                Response::Line(line) => match line.strip_prefix("OK =") {
                    Some(value) => Ok(Value::Scalar(value.to_string())),
                    None => Err(CommandError::malformed(format!("Get({})", field), line)),
                },
            },
        )
    }
}

/// Put the value of a field.
///
/// ```text
/// Put("PCAP.TRIG", "PULSE1.OUT")                    sends PCAP.TRIG=PULSE1.OUT
/// Put("SEQ1.TABLE", ["1048576", "0", "1000", "1000"]) sends SEQ1.TABLE< ... ""
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Put {
    field: String,
    value: Value,
    state: OneShot,
}

impl Put {
    /// Set `field` to `value`; a [`Value::Lines`] is sent as a table.
    pub fn new(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Put {
            field: field.into(),
            value: value.into(),
            state: OneShot::Start,
        }
    }

    fn request(&self) -> Exchange {
        match &self.value {
            Value::Scalar(value) => Exchange::new(format!("{}={}", self.field, value)),
            Value::Lines(lines) => {
                let mut to_send = Vec::with_capacity(lines.len() + 2);
                to_send.push(format!("{}<", self.field));
                to_send.extend(lines.iter().cloned());
                to_send.push(String::new());
                Exchange::with_lines(to_send)
            }
        }
    }
}

impl Command for Put {
    type Output = ();

    fn resume(&mut self, received: Vec<Exchange>) -> CommandResult<Step<()>> {
        let request = self.request();
        let display = format!("Put({}, {})", self.field, self.value);
        one_shot(
            &mut self.state,
            "Put",
            received,
            || request,
            |ex| expect_ok(display, &ex),
        )
    }
}

/// Arm PCAP for an acquisition by sending `*PCAP.ARM=`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Arm {
    state: OneShot,
}

impl Arm {
    /// Create an arm command.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Command for Arm {
    type Output = ();

    fn resume(&mut self, received: Vec<Exchange>) -> CommandResult<Step<()>> {
        one_shot(
            &mut self.state,
            "Arm",
            received,
            || Exchange::new("*PCAP.ARM="),
            |ex| expect_ok("Arm", &ex),
        )
    }
}

/// Disarm PCAP, stopping acquisition, by sending `*PCAP.DISARM=`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Disarm {
    state: OneShot,
}

impl Disarm {
    /// Create a disarm command.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Command for Disarm {
    type Output = ();

    fn resume(&mut self, received: Vec<Exchange>) -> CommandResult<Step<()>> {
        one_shot(
            &mut self.state,
            "Disarm",
            received,
            || Exchange::new("*PCAP.DISARM="),
            |ex| expect_ok("Disarm", &ex),
        )
    }
}
