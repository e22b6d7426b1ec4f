//! Field type registry used by `GetFieldInfo`.
//!
//! Each (type, subtype) pair reported by `BLOCK.*?` maps to a
//! [`FieldCategory`], which knows which follow-up queries to make and how to
//! turn their replies into a [`FieldInfo`]. Pairs that are not recognised map
//! to [`FieldCategory::Unknown`] and still produce a basic `FieldInfo`, so
//! fields added by newer server versions are never dropped.

use std::str::FromStr;

use crate::commands::Get;
use crate::error::{CommandError, CommandResult};
use crate::responses::{FieldInfo, FieldKind, ScalarOffset, Value};

/// The kinds of field that have dedicated metadata queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldCategory {
    /// `time`
    Time,
    /// `bit_out`
    BitOut,
    /// `pos_out`
    PosOut,
    /// `ext_out timestamp` and `ext_out samples`
    ExtOut,
    /// `ext_out bits`
    ExtOutBits,
    /// `bit_mux`
    BitMux,
    /// `pos_mux`
    PosMux,
    /// `param`/`read`/`write` with subtype `uint`
    Uint,
    /// `param`/`read`/`write` with subtype `scalar`
    Scalar,
    /// `param`/`read`/`write` with subtype `time`
    SubtypeTime,
    /// `param`/`read`/`write` with subtype `enum`
    Enum,
    /// Anything else.
    Unknown,
}

impl FieldCategory {
    /// Classify a field from the type and subtype the server reported.
    pub fn classify(field_type: &str, subtype: Option<&str>) -> FieldCategory {
        use FieldCategory::*;
        // Order matches the server's field type documentation
        match (field_type, subtype) {
            ("time", None) => Time,
            ("bit_out", None) => BitOut,
            ("pos_out", None) => PosOut,
            ("ext_out", Some("timestamp" | "samples")) => ExtOut,
            ("ext_out", Some("bits")) => ExtOutBits,
            ("bit_mux", None) => BitMux,
            ("pos_mux", None) => PosMux,
            ("param" | "read" | "write", Some("uint")) => Uint,
            ("param" | "read" | "write", Some("scalar")) => Scalar,
            ("param" | "read" | "write", Some("time")) => SubtypeTime,
            ("param" | "read" | "write", Some("enum")) => Enum,
            _ => Unknown,
        }
    }

    /// The fields to query (without the trailing `?`) for `field` of `block`.
    pub fn queries(&self, block: &str, field: &str) -> Vec<String> {
        use FieldCategory::*;
        match self {
            Time => vec![
                format!("*ENUMS.{}.{}.UNITS", block, field),
                format!("{}1.{}.MIN", block, field),
            ],
            BitOut => vec![
                format!("{}1.{}.CAPTURE_WORD", block, field),
                format!("{}1.{}.OFFSET", block, field),
            ],
            PosOut | ExtOut => vec![format!("*ENUMS.{}.{}.CAPTURE", block, field)],
            ExtOutBits => vec![
                format!("{}.{}.BITS", block, field),
                format!("*ENUMS.{}.{}.CAPTURE", block, field),
            ],
            BitMux => vec![
                format!("{}1.{}.MAX_DELAY", block, field),
                format!("*ENUMS.{}.{}", block, field),
            ],
            PosMux | Enum => vec![format!("*ENUMS.{}.{}", block, field)],
            Uint => vec![format!("{}1.{}.MAX", block, field)],
            Scalar => vec![
                format!("{}.{}.UNITS", block, field),
                format!("{}.{}.SCALE", block, field),
                format!("{}.{}.OFFSET", block, field),
            ],
            SubtypeTime => vec![format!("*ENUMS.{}.{}.UNITS", block, field)],
            Unknown => Vec::new(),
        }
    }
}

/// Replies to a handler's queries, consumed in the order they were asked.
struct Replies {
    items: std::vec::IntoIter<(String, Value)>,
}

impl Replies {
    fn next(&mut self) -> CommandResult<(String, Value)> {
        // Counts are checked before construction starts
        self.items.next().ok_or(CommandError::ResponseCountMismatch {
            context: "field handler".to_string(),
            expected: 1,
            actual: 0,
        })
    }

    fn scalar(&mut self) -> CommandResult<String> {
        match self.next()? {
            (_, Value::Scalar(s)) => Ok(s),
            (query, other) => Err(CommandError::malformed(format!("Get({})", query), other)),
        }
    }

    fn lines(&mut self) -> CommandResult<Vec<String>> {
        match self.next()? {
            (_, Value::Lines(lines)) => Ok(lines),
            (query, other) => Err(CommandError::malformed(format!("Get({})", query), other)),
        }
    }

    fn parse<T: FromStr>(&mut self) -> CommandResult<T> {
        match self.next()? {
            (query, Value::Scalar(s)) => s.trim().parse().map_err(|_| CommandError::InvalidNumber {
                field: query,
                value: s,
            }),
            (query, other) => Err(CommandError::malformed(format!("Get({})", query), other)),
        }
    }

    fn offset(&mut self) -> CommandResult<ScalarOffset> {
        match self.next()? {
            (query, Value::Scalar(s)) => {
                ScalarOffset::parse(&s).ok_or(CommandError::InvalidNumber { field: query, value: s })
            }
            (query, other) => Err(CommandError::malformed(format!("Get({})", query), other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum HandlerState {
    Start,
    Declared(Vec<String>),
    Finished,
}

/// Builds the [`FieldInfo`] of one field in two steps: first it declares the
/// queries it needs, then it is resumed once with their replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FieldHandler {
    block: String,
    name: String,
    field_type: String,
    subtype: Option<String>,
    category: FieldCategory,
    state: HandlerState,
}

impl FieldHandler {
    pub(crate) fn new(
        block: &str,
        name: &str,
        field_type: &str,
        subtype: Option<&str>,
    ) -> Self {
        FieldHandler {
            block: block.to_string(),
            name: name.to_string(),
            field_type: field_type.to_string(),
            subtype: subtype.map(str::to_string),
            category: FieldCategory::classify(field_type, subtype),
            state: HandlerState::Start,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Declare the follow-up queries: the type specific ones, then the
    /// description.
    pub(crate) fn declare(&mut self) -> CommandResult<Vec<Get>> {
        if self.state != HandlerState::Start {
            return Err(CommandError::ResumedAfterCompletion("FieldHandler"));
        }
        if self.category == FieldCategory::Unknown {
            log::debug!(
                "unrecognised field type {} {:?} for {}.{}",
                self.field_type,
                self.subtype,
                self.block,
                self.name
            );
        }
        let mut queries = self.category.queries(&self.block, &self.name);
        queries.push(format!("*DESC.{}.{}", self.block, self.name));
        let gets = queries.iter().map(Get::new).collect();
        self.state = HandlerState::Declared(queries);
        Ok(gets)
    }

    /// Finish with the replies to the declared queries, in request order.
    pub(crate) fn finish(&mut self, values: Vec<Value>) -> CommandResult<FieldInfo> {
        let queries = match std::mem::replace(&mut self.state, HandlerState::Finished) {
            HandlerState::Declared(queries) => queries,
            _ => return Err(CommandError::ResumedAfterCompletion("FieldHandler")),
        };
        if queries.len() != values.len() {
            return Err(CommandError::ResponseCountMismatch {
                context: format!("GetFieldInfo({}.{})", self.block, self.name),
                expected: queries.len(),
                actual: values.len(),
            });
        }

        let mut replies = Replies {
            items: queries.into_iter().zip(values).collect::<Vec<_>>().into_iter(),
        };
        let mut labels = None;
        let kind = match self.category {
            FieldCategory::Time => FieldKind::Time {
                units_labels: replies.lines()?,
                min: replies.parse()?,
            },
            FieldCategory::BitOut => FieldKind::BitOut {
                capture_word: replies.scalar()?,
                offset: replies.parse()?,
            },
            FieldCategory::PosOut => FieldKind::PosOut {
                capture_labels: replies.lines()?,
            },
            FieldCategory::ExtOut => FieldKind::ExtOut {
                capture_labels: replies.lines()?,
            },
            FieldCategory::ExtOutBits => FieldKind::ExtOutBits {
                bits: replies.lines()?,
                capture_labels: replies.lines()?,
            },
            FieldCategory::BitMux => {
                let max_delay = replies.parse()?;
                labels = Some(replies.lines()?);
                FieldKind::BitMux { max_delay }
            }
            FieldCategory::PosMux => {
                labels = Some(replies.lines()?);
                FieldKind::PosMux
            }
            FieldCategory::Uint => FieldKind::Uint {
                max: replies.parse()?,
            },
            FieldCategory::Scalar => FieldKind::Scalar {
                units: replies.scalar()?,
                scale: replies.parse()?,
                offset: replies.offset()?,
            },
            FieldCategory::SubtypeTime => FieldKind::SubtypeTime {
                units_labels: replies.lines()?,
            },
            FieldCategory::Enum => {
                labels = Some(replies.lines()?);
                FieldKind::Enum
            }
            FieldCategory::Unknown => FieldKind::Basic,
        };
        let description = Some(replies.scalar()?);

        Ok(FieldInfo {
            field_type: self.field_type.clone(),
            subtype: self.subtype.clone(),
            description,
            labels,
            kind,
        })
    }
}
