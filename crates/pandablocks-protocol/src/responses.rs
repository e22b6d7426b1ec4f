//! Typed results produced by the commands.

use std::fmt;

use indexmap::IndexMap;

/// The value of a field, as read by `Get` or written by `Put`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A single line value (`OK =value`).
    Scalar(String),
    /// A table or other multiline value.
    Lines(Vec<String>),
}

impl Value {
    /// The scalar value, if this is one.
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            Value::Scalar(s) => Some(s),
            Value::Lines(_) => None,
        }
    }

    /// The lines of a multiline value, if this is one.
    pub fn as_lines(&self) -> Option<&[String]> {
        match self {
            Value::Lines(lines) => Some(lines),
            Value::Scalar(_) => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Scalar(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Scalar(s)
    }
}

impl From<Vec<String>> for Value {
    fn from(lines: Vec<String>) -> Self {
        Value::Lines(lines)
    }
}

impl From<Vec<&str>> for Value {
    fn from(lines: Vec<&str>) -> Self {
        Value::Lines(lines.into_iter().map(str::to_string).collect())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Scalar(s) => write!(f, "{}", s),
            Value::Lines(lines) => write!(f, "{:?}", lines),
        }
    }
}

/// Block number and description as exposed by the TCP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    /// Number of instances of this block.
    pub number: u32,
    /// Description of the block, `None` if it was not requested.
    pub description: Option<String>,
}

/// The offset attribute of a `scalar` field.
///
/// Servers have been seen reporting this both as an integer (`0`) and as a
/// fractional value, so both representations are kept.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarOffset {
    /// The device sent an integer.
    Integer(i64),
    /// The device sent a non-integral number.
    Float(f64),
}

impl ScalarOffset {
    /// Parse the offset, preferring the integer form.
    pub fn parse(s: &str) -> Option<ScalarOffset> {
        let s = s.trim();
        if let Ok(i) = s.parse::<i64>() {
            return Some(ScalarOffset::Integer(i));
        }
        s.parse::<f64>().ok().map(ScalarOffset::Float)
    }

    /// The offset as a float, whatever form it arrived in.
    pub fn as_f64(&self) -> f64 {
        match *self {
            ScalarOffset::Integer(i) => i as f64,
            ScalarOffset::Float(f) => f,
        }
    }
}

/// Type specific attributes of a field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// No extra attributes: unrecognised type, or extended metadata disabled.
    Basic,
    /// `param`/`read`/`write` with subtype `uint`.
    Uint {
        /// Maximum allowed value.
        max: u64,
    },
    /// `param`/`read`/`write` with subtype `scalar`.
    Scalar {
        /// Units string.
        units: String,
        /// Scale applied to the raw value.
        scale: f64,
        /// Offset applied to the scaled value.
        offset: ScalarOffset,
    },
    /// `param`/`read`/`write` with subtype `time`.
    SubtypeTime {
        /// Valid values of the `UNITS` attribute.
        units_labels: Vec<String>,
    },
    /// `param`/`read`/`write` with subtype `enum`; labels are in [`FieldInfo::labels`].
    Enum,
    /// `time` fields.
    Time {
        /// Valid values of the `UNITS` attribute.
        units_labels: Vec<String>,
        /// Minimum programmable time.
        min: f64,
    },
    /// `bit_out` fields.
    BitOut {
        /// Name of the capture word this bit is part of.
        capture_word: String,
        /// Bit offset within the capture word.
        offset: u32,
    },
    /// `bit_mux` fields; labels are the selectable bits.
    BitMux {
        /// Maximum delay that can be set.
        max_delay: u32,
    },
    /// `pos_mux` fields; labels are the selectable positions.
    PosMux,
    /// `pos_out` fields.
    PosOut {
        /// Valid values of the `CAPTURE` attribute.
        capture_labels: Vec<String>,
    },
    /// `ext_out` fields with subtype `timestamp` or `samples`.
    ExtOut {
        /// Valid values of the `CAPTURE` attribute.
        capture_labels: Vec<String>,
    },
    /// `ext_out` fields with subtype `bits`.
    ExtOutBits {
        /// Names of the bits in this capture word.
        bits: Vec<String>,
        /// Valid values of the `CAPTURE` attribute.
        capture_labels: Vec<String>,
    },
}

/// Field type, subtype, description and labels as exposed by the TCP server.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    /// Field type, like `param`, `bit_out`, `pos_mux`.
    pub field_type: String,
    /// Subtype, like `uint`, `scalar`, `lut`.
    pub subtype: Option<String>,
    /// Description of the field.
    pub description: Option<String>,
    /// Valid values for fields with a defined list of them.
    pub labels: Option<Vec<String>>,
    /// Type specific attributes.
    pub kind: FieldKind,
}

impl FieldInfo {
    /// A field with only its type and subtype known.
    pub fn basic(field_type: impl Into<String>, subtype: Option<String>) -> Self {
        FieldInfo {
            field_type: field_type.into(),
            subtype,
            description: None,
            labels: None,
            kind: FieldKind::Basic,
        }
    }
}

/// The changes returned from a `*CHANGES` query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changes {
    /// Field -> value for single line values, in the order reported.
    pub values: IndexMap<String, String>,
    /// Fields that were reported without a value (tables, multiline metadata).
    pub no_value: Vec<String>,
    /// Fields that are in error.
    pub in_error: Vec<String>,
}

impl Changes {
    /// Total number of fields reported.
    pub fn len(&self) -> usize {
        self.values.len() + self.no_value.len() + self.in_error.len()
    }

    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
