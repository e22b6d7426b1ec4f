//! Batched multiplexing of commands.
//!
//! Every round, each unfinished command is resumed with its own filled-in
//! exchanges and asked for the next ones. Everything requested in a round is
//! concatenated, in submission order, into one batch for the transport, so
//! a set of commands costs as many round trips as its longest member rather
//! than the sum of them.

use std::fmt;

use log::trace;

use crate::commands::{Command, Step};
use crate::error::{CommandError, CommandResult, ScheduleError};
use crate::exchange::{Exchange, Response};

/// The collaborator that moves request batches over the wire.
///
/// Implementations must return exactly one response per request, in the
/// same order.
pub trait Transport {
    /// Error raised when the batch cannot be delivered.
    type Error;

    /// Send every request in `requests` and wait for all the replies.
    fn round_trip(&mut self, requests: &[Vec<String>]) -> Result<Vec<Response>, Self::Error>;
}

/// Fill `exchanges` from a response batch, checking the batch shape.
pub fn fill_exchanges(exchanges: &mut [Exchange], responses: Vec<Response>) -> CommandResult<()> {
    if responses.len() != exchanges.len() {
        return Err(CommandError::SchedulerShapeViolation {
            expected: exchanges.len(),
            actual: responses.len(),
        });
    }
    for (ex, response) in exchanges.iter_mut().zip(responses) {
        ex.fill(response)?;
    }
    Ok(())
}

/// What an [`Execution`] needs next.
#[derive(Debug, Clone, PartialEq)]
pub enum Next<T> {
    /// Send these requests as one batch and pass the replies to
    /// [`Execution::step`].
    Send(Vec<Vec<String>>),
    /// The command has finished.
    Done(T),
}

/// A command being driven to completion, independent of any IO.
///
/// Blocking and async transports share this so they step commands the same
/// way:
///
/// ```rust,ignore
/// let mut execution = Execution::new(command);
/// let mut responses = Vec::new();
/// loop {
///     match execution.step(responses)? {
///         Next::Done(output) => break output,
///         Next::Send(requests) => responses = transport.send(&requests).await?,
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Execution<C> {
    command: C,
    pending: Vec<Exchange>,
}

impl<C: Command> Execution<C> {
    /// Start driving `command`.
    pub fn new(command: C) -> Self {
        Execution {
            command,
            pending: Vec::new(),
        }
    }

    /// Hand over the replies to the last batch (nothing on the first call)
    /// and get the next batch or the output.
    ///
    /// Never returns an empty batch.
    pub fn step(&mut self, responses: Vec<Response>) -> CommandResult<Next<C::Output>> {
        let mut received = std::mem::take(&mut self.pending);
        fill_exchanges(&mut received, responses)?;
        loop {
            match self.command.resume(received)? {
                Step::Done(output) => return Ok(Next::Done(output)),
                Step::Send(exchanges) if exchanges.is_empty() => received = exchanges,
                Step::Send(exchanges) => {
                    let requests: Vec<Vec<String>> =
                        exchanges.iter().map(|ex| ex.to_send().to_vec()).collect();
                    trace!("sending batch of {} exchanges", requests.len());
                    self.pending = exchanges;
                    return Ok(Next::Send(requests));
                }
            }
        }
    }
}

/// Run a command to completion over `transport`.
///
/// To run several commands at once, pass a [`Batch`] or a [`join`]ed tuple.
pub fn execute<C, T>(transport: &mut T, command: C) -> Result<C::Output, ScheduleError<T::Error>>
where
    C: Command,
    T: Transport + ?Sized,
{
    let mut execution = Execution::new(command);
    let mut responses = Vec::new();
    loop {
        match execution.step(responses)? {
            Next::Done(output) => return Ok(output),
            Next::Send(requests) => {
                responses = transport
                    .round_trip(&requests)
                    .map_err(ScheduleError::Transport)?;
            }
        }
    }
}

/// A command inside a batch, with its output once it has finished.
pub struct Slot<C: Command> {
    command: C,
    output: Option<C::Output>,
    pending: usize,
    finished: bool,
}

impl<C: Command> Slot<C> {
    fn new(command: C) -> Self {
        Slot {
            command,
            output: None,
            pending: 0,
            finished: false,
        }
    }

    fn take(&mut self, context: &'static str) -> CommandResult<C::Output> {
        self.output
            .take()
            .ok_or(CommandError::ResumedAfterCompletion(context))
    }
}

impl<C: Command + fmt::Debug> fmt::Debug for Slot<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("command", &self.command)
            .field("pending", &self.pending)
            .field("finished", &self.finished)
            .finish()
    }
}

/// Type-erased view of a [`Slot`] used by the round driver.
trait Task {
    fn is_finished(&self) -> bool;
    fn pending(&self) -> usize;
    fn advance(&mut self, received: Vec<Exchange>) -> CommandResult<Vec<Exchange>>;
}

impl<C: Command> Task for Slot<C> {
    fn is_finished(&self) -> bool {
        self.finished
    }

    fn pending(&self) -> usize {
        self.pending
    }

    fn advance(&mut self, mut received: Vec<Exchange>) -> CommandResult<Vec<Exchange>> {
        loop {
            match self.command.resume(received)? {
                Step::Done(output) => {
                    self.output = Some(output);
                    self.pending = 0;
                    self.finished = true;
                    return Ok(Vec::new());
                }
                // Nothing to send yet, resume again within this round
                Step::Send(exchanges) if exchanges.is_empty() => received = Vec::new(),
                Step::Send(exchanges) => {
                    self.pending = exchanges.len();
                    return Ok(exchanges);
                }
            }
        }
    }
}

/// Run one round: hand each task its share of `received`, collect what they
/// ask for next. Returns `None` once every task has finished.
fn drive_round(
    context: &'static str,
    tasks: &mut [&mut dyn Task],
    received: Vec<Exchange>,
) -> CommandResult<Option<Vec<Exchange>>> {
    let expected: usize = tasks.iter().map(|t| t.pending()).sum();
    if received.len() != expected {
        return Err(CommandError::SchedulerShapeViolation {
            expected,
            actual: received.len(),
        });
    }

    let mut received = received.into_iter();
    let mut batch = Vec::new();
    for task in tasks.iter_mut().filter(|t| !t.is_finished()) {
        let own: Vec<Exchange> = received.by_ref().take(task.pending()).collect();
        batch.extend(task.advance(own)?);
    }

    if batch.is_empty() {
        trace!("{}: all commands finished", context);
        Ok(None)
    } else {
        Ok(Some(batch))
    }
}

/// Run any number of commands of the same type concurrently.
///
/// Outputs come back in submission order.
#[derive(Debug)]
pub struct Batch<C: Command> {
    slots: Vec<Slot<C>>,
    done: bool,
}

impl<C: Command> Batch<C> {
    /// Batch the given commands.
    pub fn new(commands: impl IntoIterator<Item = C>) -> Self {
        Batch {
            slots: commands.into_iter().map(Slot::new).collect(),
            done: false,
        }
    }

    /// Number of commands in the batch.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the batch holds no commands.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl<C: Command> FromIterator<C> for Batch<C> {
    fn from_iter<I: IntoIterator<Item = C>>(iter: I) -> Self {
        Batch::new(iter)
    }
}

impl<C: Command> Command for Batch<C> {
    type Output = Vec<C::Output>;

    fn resume(&mut self, received: Vec<Exchange>) -> CommandResult<Step<Self::Output>> {
        if self.done {
            return Err(CommandError::ResumedAfterCompletion("Batch"));
        }
        let mut tasks: Vec<&mut dyn Task> =
            self.slots.iter_mut().map(|s| s as &mut dyn Task).collect();
        match drive_round("Batch", &mut tasks, received)? {
            Some(batch) => Ok(Step::Send(batch)),
            None => {
                self.done = true;
                self.slots
                    .iter_mut()
                    .map(|s| s.take("Batch"))
                    .collect::<CommandResult<Vec<_>>>()
                    .map(Step::Done)
            }
        }
    }
}

/// Run a fixed set of commands of different types concurrently.
///
/// Built with [`join`]; the output is a tuple in submission order.
#[derive(Debug)]
pub struct Join<S> {
    slots: S,
    done: bool,
}

/// Tuples of commands that can be run together with [`join`].
pub trait IntoJoin {
    /// The combined command.
    type Joined: Command;

    /// Combine the commands.
    fn into_join(self) -> Self::Joined;
}

/// Combine a tuple of 2 to 4 commands into one command producing a tuple.
///
/// ```rust,ignore
/// let (active, ()) = execute(&mut client, join((Get::new("PCAP.ACTIVE"), Arm::new())))?;
/// ```
pub fn join<T: IntoJoin>(commands: T) -> T::Joined {
    commands.into_join()
}

macro_rules! impl_join {
    ($($C:ident => $idx:tt),+) => {
        impl<$($C: Command),+> IntoJoin for ($($C,)+) {
            type Joined = Join<($(Slot<$C>,)+)>;

            fn into_join(self) -> Self::Joined {
                Join {
                    slots: ($(Slot::new(self.$idx),)+),
                    done: false,
                }
            }
        }

        impl<$($C: Command),+> Command for Join<($(Slot<$C>,)+)> {
            type Output = ($(<$C as Command>::Output,)+);

            fn resume(&mut self, received: Vec<Exchange>) -> CommandResult<Step<Self::Output>> {
                if self.done {
                    return Err(CommandError::ResumedAfterCompletion("Join"));
                }
                let mut tasks: Vec<&mut dyn Task> = vec![$(&mut self.slots.$idx as &mut dyn Task),+];
                match drive_round("Join", &mut tasks, received)? {
                    Some(batch) => Ok(Step::Send(batch)),
                    None => {
                        self.done = true;
                        Ok(Step::Done(($(self.slots.$idx.take("Join")?,)+)))
                    }
                }
            }
        }
    };
}

impl_join!(A => 0, B => 1);
impl_join!(A => 0, B => 1, C => 2);
impl_join!(A => 0, B => 1, C => 2, D => 3);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::{line, run_with};
    use crate::commands::{Get, Put};
    use crate::responses::Value;

    /// Needs `rounds` sequential round trips, sending one query per round.
    struct Chain {
        name: &'static str,
        rounds: usize,
        done: usize,
    }

    impl Command for Chain {
        type Output = usize;

        fn resume(&mut self, received: Vec<Exchange>) -> CommandResult<Step<usize>> {
            self.done += received.len();
            if self.done == self.rounds {
                Ok(Step::Done(self.done))
            } else {
                Ok(Step::Send(vec![Exchange::new(format!("{}{}?", self.name, self.done))]))
            }
        }
    }

    #[test]
    fn test_rounds_are_max_not_sum() {
        let a = Chain { name: "A", rounds: 1, done: 0 };
        let b = Chain { name: "B", rounds: 3, done: 0 };
        let (sent, out) = run_with(
            join((a, b)),
            vec![
                vec![line("OK =0"), line("OK =0")],
                vec![line("OK =1")],
                vec![line("OK =2")],
            ],
        );
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0], vec![vec!["A0?".to_string()], vec!["B0?".to_string()]]);
        assert_eq!(sent[1], vec![vec!["B1?".to_string()]]);
        assert_eq!(out.unwrap(), (1, 3));
    }

    #[test]
    fn test_batch_outputs_in_submission_order() {
        let batch = Batch::new(vec![Get::new("A"), Get::new("B"), Get::new("C")]);
        let (sent, out) = run_with(
            batch,
            vec![vec![line("OK =a"), line("OK =b"), line("OK =c")]],
        );
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].len(), 3);
        assert_eq!(
            out.unwrap(),
            vec![Value::from("a"), Value::from("b"), Value::from("c")]
        );
    }

    #[test]
    fn test_empty_batch_finishes_immediately() {
        let (sent, out) = run_with(Batch::<Get>::new(Vec::new()), Vec::new());
        assert!(sent.is_empty());
        assert!(out.unwrap().is_empty());
    }

    #[test]
    fn test_join_heterogeneous() {
        let (_, out) = run_with(
            join((Get::new("PCAP.ACTIVE"), Put::new("PCAP.TRIG", "PULSE1.OUT"))),
            vec![vec![line("OK =1"), line("OK")]],
        );
        assert_eq!(out.unwrap(), (Value::from("1"), ()));
    }

    #[test]
    fn test_short_response_batch_is_shape_violation() {
        let mut batch = Batch::new(vec![Get::new("A"), Get::new("B")]);
        let sent = match batch.resume(Vec::new()).unwrap() {
            Step::Send(ex) => ex,
            Step::Done(_) => unreachable!(),
        };
        let mut partial: Vec<Exchange> = sent.into_iter().take(1).collect();
        partial[0].fill(line("OK =a")).unwrap();
        assert_eq!(
            batch.resume(partial).unwrap_err(),
            CommandError::SchedulerShapeViolation { expected: 2, actual: 1 }
        );
    }

    #[test]
    fn test_execution_steps() {
        let mut execution = Execution::new(join((Get::new("A"), Put::new("B", "1"))));
        assert_eq!(
            execution.step(Vec::new()).unwrap(),
            Next::Send(vec![vec!["A?".to_string()], vec!["B=1".to_string()]])
        );
        assert_eq!(
            execution.step(vec![line("OK =2"), line("OK")]).unwrap(),
            Next::Done((Value::from("2"), ()))
        );
    }

    #[test]
    fn test_execution_rejects_short_reply_batch() {
        let mut execution = Execution::new(Batch::new([Get::new("A"), Get::new("B")]));
        execution.step(Vec::new()).unwrap();
        assert_eq!(
            execution.step(vec![line("OK =1")]).unwrap_err(),
            CommandError::SchedulerShapeViolation { expected: 2, actual: 1 }
        );
    }

    #[test]
    fn test_execution_of_empty_batch_sends_nothing() {
        let mut execution = Execution::new(Batch::<Get>::new(Vec::new()));
        assert_eq!(execution.step(Vec::new()).unwrap(), Next::Done(Vec::new()));
    }

    #[test]
    fn test_fill_exchanges_checks_shape() {
        let mut exchanges = vec![Exchange::new("A?")];
        let err = fill_exchanges(&mut exchanges, vec![line("OK =1"), line("OK =2")]).unwrap_err();
        assert_eq!(err, CommandError::SchedulerShapeViolation { expected: 1, actual: 2 });
    }
}
