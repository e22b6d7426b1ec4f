//! The `*CHANGES` query.

use std::fmt;
use std::str::FromStr;

use crate::commands::{take_one, Command, OneShot, Step};
use crate::error::{CommandError, CommandResult};
use crate::exchange::Exchange;
use crate::responses::Changes;

/// Which group of values to ask for on `*CHANGES`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChangeGroup {
    /// All the groups below.
    #[default]
    All,
    /// Configuration settings.
    Config,
    /// Bits on the system bus.
    Bits,
    /// Positions.
    Posn,
    /// Polled read values.
    Read,
    /// Attributes, including capture enable flags.
    Attr,
    /// Table changes.
    Table,
    /// Multiline metadata changes.
    Metadata,
}

impl ChangeGroup {
    /// The suffix appended to `*CHANGES` for this group.
    pub fn suffix(&self) -> &'static str {
        match self {
            ChangeGroup::All => "",
            ChangeGroup::Config => ".CONFIG",
            ChangeGroup::Bits => ".BITS",
            ChangeGroup::Posn => ".POSN",
            ChangeGroup::Read => ".READ",
            ChangeGroup::Attr => ".ATTR",
            ChangeGroup::Table => ".TABLE",
            ChangeGroup::Metadata => ".METADATA",
        }
    }
}

impl fmt::Display for ChangeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeGroup::All => write!(f, "all"),
            other => write!(f, "{}", other.suffix()[1..].to_lowercase()),
        }
    }
}

impl FromStr for ChangeGroup {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" | "" => Ok(ChangeGroup::All),
            "config" => Ok(ChangeGroup::Config),
            "bits" => Ok(ChangeGroup::Bits),
            "posn" => Ok(ChangeGroup::Posn),
            "read" => Ok(ChangeGroup::Read),
            "attr" => Ok(ChangeGroup::Attr),
            "table" => Ok(ChangeGroup::Table),
            "metadata" => Ok(ChangeGroup::Metadata),
            other => Err(format!("unknown change group: {}", other)),
        }
    }
}

/// Sort the lines of a `*CHANGES` reply into values, fields without a value
/// and fields in error.
pub fn parse_changes(lines: &[String]) -> CommandResult<Changes> {
    let mut changes = Changes::default();
    for line in lines {
        if let Some(field) = line.strip_suffix('<') {
            changes.no_value.push(field.to_string());
        } else if line.ends_with("(error)") {
            let field = line.split(' ').next().unwrap_or_default();
            changes.in_error.push(field.to_string());
        } else if let Some((field, value)) = line.split_once('=') {
            changes.values.insert(field.to_string(), value.to_string());
        } else {
            return Err(CommandError::malformed("*CHANGES?", line));
        }
    }
    Ok(changes)
}

/// Get a [`Changes`] showing which fields have changed since the last time
/// this was called on the connection.
///
/// ```text
/// GetChanges(All) -> Changes {
///     values: {"PCAP.TRIG": "PULSE1.OUT"},
///     no_value: ["SEQ1.TABLE"],
///     in_error: ["BAD.ENUM"],
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GetChanges {
    group: ChangeGroup,
    state: OneShot,
}

impl GetChanges {
    /// Query the changes in `group`.
    pub fn new(group: ChangeGroup) -> Self {
        GetChanges {
            group,
            state: OneShot::Start,
        }
    }

    /// The group being queried.
    pub fn group(&self) -> ChangeGroup {
        self.group
    }
}

impl Command for GetChanges {
    type Output = Changes;

    fn resume(&mut self, received: Vec<Exchange>) -> CommandResult<Step<Changes>> {
        match self.state {
            OneShot::Start => {
                self.state = OneShot::Awaiting;
                Ok(Step::Send(vec![Exchange::new(format!(
                    "*CHANGES{}?",
                    self.group.suffix()
                ))]))
            }
            OneShot::Awaiting => {
                self.state = OneShot::Finished;
                let ex = take_one("GetChanges", received)?;
                parse_changes(ex.lines()?).map(Step::Done)
            }
            OneShot::Finished => Err(CommandError::ResumedAfterCompletion("GetChanges")),
        }
    }
}
