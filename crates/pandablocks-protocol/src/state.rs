//! Saving and restoring the full configuration of a device.
//!
//! [`GetState`] produces a flat list of lines that, replayed with
//! [`SetState`], puts an unchanged device back into the same state:
//!
//! ```text
//! PCAP.TRIG=PULSE1.OUT
//! SEQ1.TABLE<B
//! 234fds0SDklnmnr
//!
//! *METADATA.DESIGN<
//! first line
//! second line
//!
//! ```

use indexmap::IndexMap;
use log::warn;

use crate::changes::{ChangeGroup, GetChanges};
use crate::commands::{Command, Get, Raw, Step};
use crate::error::{CommandError, CommandResult};
use crate::exchange::{is_multiline_command, Exchange};
use crate::responses::{Changes, Value};
use crate::scheduler::Batch;

#[derive(Debug)]
enum GetStateProgress {
    Start,
    Changes(Batch<GetChanges>),
    Multiline {
        state: Vec<String>,
        headers: Vec<String>,
        batch: Batch<Get>,
    },
    Finished,
}

/// Get the state of every field that should be saved, as raw lines that can
/// be sent back with [`SetState`].
///
/// Costs two round trips: one for the four change groups, one for the
/// contents of every table (base64 encoded) and multiline metadata field.
#[derive(Debug)]
pub struct GetState {
    progress: GetStateProgress,
}

impl Default for GetState {
    fn default() -> Self {
        Self::new()
    }
}

impl GetState {
    /// Create the command.
    pub fn new() -> Self {
        GetState {
            progress: GetStateProgress::Start,
        }
    }

    fn changes(
        &mut self,
        mut batch: Batch<GetChanges>,
        received: Vec<Exchange>,
    ) -> CommandResult<Step<Vec<String>>> {
        let changes = match batch.resume(received)? {
            Step::Send(exchanges) => {
                self.progress = GetStateProgress::Changes(batch);
                return Ok(Step::Send(exchanges));
            }
            Step::Done(changes) => changes,
        };
        let actual = changes.len();
        let [attr, config, table, metadata]: [Changes; 4] =
            changes
                .try_into()
                .map_err(|_| CommandError::ResponseCountMismatch {
                    context: "GetState".to_string(),
                    expected: 4,
                    actual,
                })?;

        // Single line values first
        let mut values = IndexMap::new();
        for group in [attr.values, config.values, metadata.values] {
            values.extend(group);
        }
        let state: Vec<String> = values
            .into_iter()
            .map(|(field, value)| format!("{}={}", field, value))
            .collect();

        // Then everything that needs fetching separately
        let mut headers = Vec::new();
        let mut gets = Vec::new();
        for field in table.no_value {
            headers.push(format!("{}<B", field));
            gets.push(Get::new(format!("{}.B", field)));
        }
        for field in metadata.no_value {
            headers.push(format!("{}<", field));
            gets.push(Get::new(field));
        }
        self.multiline(state, headers, Batch::new(gets), Vec::new())
    }

    fn multiline(
        &mut self,
        mut state: Vec<String>,
        headers: Vec<String>,
        mut batch: Batch<Get>,
        received: Vec<Exchange>,
    ) -> CommandResult<Step<Vec<String>>> {
        let values = match batch.resume(received)? {
            Step::Send(exchanges) => {
                self.progress = GetStateProgress::Multiline {
                    state,
                    headers,
                    batch,
                };
                return Ok(Step::Send(exchanges));
            }
            Step::Done(values) => values,
        };
        for (header, value) in headers.into_iter().zip(values) {
            let lines = match value {
                Value::Lines(lines) => lines,
                other => return Err(CommandError::malformed(format!("Get({})", header), other)),
            };
            state.push(header);
            state.extend(lines);
            state.push(String::new());
        }
        Ok(Step::Done(state))
    }
}

impl Command for GetState {
    type Output = Vec<String>;

    fn resume(&mut self, received: Vec<Exchange>) -> CommandResult<Step<Vec<String>>> {
        match std::mem::replace(&mut self.progress, GetStateProgress::Finished) {
            GetStateProgress::Start => {
                let batch = Batch::new([
                    GetChanges::new(ChangeGroup::Attr),
                    GetChanges::new(ChangeGroup::Config),
                    GetChanges::new(ChangeGroup::Table),
                    GetChanges::new(ChangeGroup::Metadata),
                ]);
                self.changes(batch, Vec::new())
            }
            GetStateProgress::Changes(batch) => self.changes(batch, received),
            GetStateProgress::Multiline {
                state,
                headers,
                batch,
            } => self.multiline(state, headers, batch, received),
            GetStateProgress::Finished => Err(CommandError::ResumedAfterCompletion("GetState")),
        }
    }
}

/// Split saved state lines into the commands that restore them.
///
/// A command is a single `field=value` line, or a table header followed by
/// its value lines up to and including the blank terminator. The input is
/// assumed to be well formed [`GetState`] output; an unterminated table at
/// the end is dropped rather than sent.
pub fn group_state_lines(state: &[String]) -> Vec<Vec<String>> {
    let mut groups = Vec::new();
    let mut current: Vec<String> = Vec::new();
    for line in state {
        current.push(line.clone());
        let first_line = current.len() == 1;
        if (first_line && !is_multiline_command(line)) || line.is_empty() {
            groups.push(std::mem::take(&mut current));
        }
    }
    groups
}

/// A restore command the device did not acknowledge with `OK`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreFailure {
    /// The lines that were sent.
    pub lines: Vec<String>,
    /// The reply that came back.
    pub response: Vec<String>,
}

#[derive(Debug)]
enum SetStateProgress {
    Start,
    Restoring {
        groups: Vec<Vec<String>>,
        batch: Batch<Raw>,
    },
    Finished,
}

/// Restore the state of the device from lines produced by [`GetState`].
///
/// Every command is sent in a single batch. Commands that fail are logged
/// and returned; they do not stop the rest of the state being restored.
#[derive(Debug)]
pub struct SetState {
    state: Vec<String>,
    progress: SetStateProgress,
}

impl SetState {
    /// Restore `state`.
    pub fn new<I, S>(state: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SetState {
            state: state.into_iter().map(Into::into).collect(),
            progress: SetStateProgress::Start,
        }
    }

    fn restore(
        &mut self,
        groups: Vec<Vec<String>>,
        mut batch: Batch<Raw>,
        received: Vec<Exchange>,
    ) -> CommandResult<Step<Vec<RestoreFailure>>> {
        let replies = match batch.resume(received)? {
            Step::Send(exchanges) => {
                self.progress = SetStateProgress::Restoring { groups, batch };
                return Ok(Step::Send(exchanges));
            }
            Step::Done(replies) => replies,
        };
        let mut failures = Vec::new();
        for (lines, response) in groups.into_iter().zip(replies) {
            if response != ["OK"] {
                warn!("command {:?} failed with {:?}", lines, response);
                failures.push(RestoreFailure { lines, response });
            }
        }
        Ok(Step::Done(failures))
    }
}

impl Command for SetState {
    type Output = Vec<RestoreFailure>;

    fn resume(&mut self, received: Vec<Exchange>) -> CommandResult<Step<Self::Output>> {
        match std::mem::replace(&mut self.progress, SetStateProgress::Finished) {
            SetStateProgress::Start => {
                let groups = group_state_lines(&self.state);
                let batch = groups.iter().map(|lines| Raw::new(lines.clone())).collect();
                self.restore(groups, batch, Vec::new())
            }
            SetStateProgress::Restoring { groups, batch } => self.restore(groups, batch, received),
            SetStateProgress::Finished => Err(CommandError::ResumedAfterCompletion("SetState")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::{line, lines, run_with};

    fn owned(ls: &[&str]) -> Vec<String> {
        ls.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_get_state_two_round_trips() {
        let (sent, out) = run_with(
            GetState::new(),
            vec![
                vec![
                    lines(&["PCAP.TRIG.CAPTURE=Value"]),
                    lines(&["PCAP.TRIG=PULSE1.OUT", "PULSE1.DELAY=1.5"]),
                    lines(&["SEQ1.TABLE<"]),
                    lines(&["*METADATA.LABEL_A=Motor", "*METADATA.DESIGN<"]),
                ],
                vec![lines(&["AAAABBBB", "CCCC"]), lines(&["line one", "line two"])],
            ],
        );
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[0],
            vec![
                vec!["*CHANGES.ATTR?".to_string()],
                vec!["*CHANGES.CONFIG?".to_string()],
                vec!["*CHANGES.TABLE?".to_string()],
                vec!["*CHANGES.METADATA?".to_string()],
            ]
        );
        assert_eq!(
            sent[1],
            vec![
                vec!["SEQ1.TABLE.B?".to_string()],
                vec!["*METADATA.DESIGN?".to_string()],
            ]
        );
        assert_eq!(
            out.unwrap(),
            vec![
                "PCAP.TRIG.CAPTURE=Value",
                "PCAP.TRIG=PULSE1.OUT",
                "PULSE1.DELAY=1.5",
                "*METADATA.LABEL_A=Motor",
                "SEQ1.TABLE<B",
                "AAAABBBB",
                "CCCC",
                "",
                "*METADATA.DESIGN<",
                "line one",
                "line two",
                "",
            ]
        );
    }

    #[test]
    fn test_get_state_without_tables_skips_second_round() {
        let (sent, out) = run_with(
            GetState::new(),
            vec![vec![
                lines(&[]),
                lines(&["PCAP.TRIG=PULSE1.OUT"]),
                lines(&[]),
                lines(&[]),
            ]],
        );
        assert_eq!(sent.len(), 1);
        assert_eq!(out.unwrap(), vec!["PCAP.TRIG=PULSE1.OUT"]);
    }

    #[test]
    fn test_group_state_lines() {
        let state = owned(&[
            "PCAP.TRIG=PULSE1.OUT",
            "SEQ1.TABLE<B",
            "AAAA",
            "",
            "PULSE1.DELAY=1.5",
            "*METADATA.DESIGN<",
            "x",
            "",
        ]);
        assert_eq!(
            group_state_lines(&state),
            vec![
                owned(&["PCAP.TRIG=PULSE1.OUT"]),
                owned(&["SEQ1.TABLE<B", "AAAA", ""]),
                owned(&["PULSE1.DELAY=1.5"]),
                owned(&["*METADATA.DESIGN<", "x", ""]),
            ]
        );
    }

    #[test]
    fn test_set_state_reports_failures_and_continues() {
        let (sent, out) = run_with(
            SetState::new(["PCAP.TRIG=PULSE1.OUT", "SEQ1.TABLE<B", "AAAA", "", "BAD.FIELD=1"]),
            vec![vec![line("OK"), line("OK"), line("ERR No such field")]],
        );
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].len(), 3);
        assert_eq!(sent[0][1], vec!["SEQ1.TABLE<B", "AAAA", ""]);
        assert_eq!(
            out.unwrap(),
            vec![RestoreFailure {
                lines: owned(&["BAD.FIELD=1"]),
                response: owned(&["ERR No such field"]),
            }]
        );
    }
}
