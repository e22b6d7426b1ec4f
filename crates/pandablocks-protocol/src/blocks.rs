//! Block and field introspection commands.

use std::collections::BTreeMap;

use indexmap::IndexMap;

use crate::commands::{take_one, Command, Get, Step};
use crate::error::{CommandError, CommandResult};
use crate::exchange::Exchange;
use crate::field_info::FieldHandler;
use crate::responses::{BlockInfo, FieldInfo, Value};
use crate::scheduler::Batch;

fn parse_index(field: &str, value: &str) -> CommandResult<u32> {
    value.parse().map_err(|_| CommandError::InvalidNumber {
        field: field.to_string(),
        value: value.to_string(),
    })
}

/// Split off the first whitespace separated token, returning it and the
/// rest of the line with leading whitespace removed.
fn next_token(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    Some(match s.split_once(char::is_whitespace) {
        Some((token, rest)) => (token, rest.trim_start()),
        None => (s, ""),
    })
}

#[derive(Debug)]
enum BlockInfoState {
    Start,
    Listing,
    Describing {
        blocks: Vec<(String, u32)>,
        batch: Batch<Get>,
    },
    Finished,
}

/// Get the number and description of every block type, alphabetically
/// ordered.
///
/// ```text
/// GetBlockInfo -> {
///     "LUT": BlockInfo { number: 8, description: Some("Lookup table") },
///     "PCAP": BlockInfo { number: 1, description: Some("Position capture control") },
///     ...
/// }
/// ```
#[derive(Debug)]
pub struct GetBlockInfo {
    skip_description: bool,
    state: BlockInfoState,
}

impl Default for GetBlockInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl GetBlockInfo {
    /// Fetch block numbers and descriptions.
    pub fn new() -> Self {
        GetBlockInfo {
            skip_description: false,
            state: BlockInfoState::Start,
        }
    }

    /// Skip the per-block description queries, saving a round trip.
    pub fn skip_description(mut self, skip: bool) -> Self {
        self.skip_description = skip;
        self
    }

    fn describe(
        &mut self,
        blocks: Vec<(String, u32)>,
        mut batch: Batch<Get>,
        received: Vec<Exchange>,
    ) -> CommandResult<Step<BTreeMap<String, BlockInfo>>> {
        match batch.resume(received)? {
            Step::Send(exchanges) => {
                self.state = BlockInfoState::Describing { blocks, batch };
                Ok(Step::Send(exchanges))
            }
            Step::Done(descriptions) => {
                let mut infos = BTreeMap::new();
                for ((block, number), description) in blocks.into_iter().zip(descriptions) {
                    let description = match description {
                        Value::Scalar(s) => s,
                        other => {
                            return Err(CommandError::malformed(
                                format!("Get(*DESC.{})", block),
                                other,
                            ))
                        }
                    };
                    infos.insert(
                        block,
                        BlockInfo {
                            number,
                            description: Some(description),
                        },
                    );
                }
                Ok(Step::Done(infos))
            }
        }
    }
}

impl Command for GetBlockInfo {
    type Output = BTreeMap<String, BlockInfo>;

    fn resume(&mut self, received: Vec<Exchange>) -> CommandResult<Step<Self::Output>> {
        match std::mem::replace(&mut self.state, BlockInfoState::Finished) {
            BlockInfoState::Start => {
                self.state = BlockInfoState::Listing;
                Ok(Step::Send(vec![Exchange::new("*BLOCKS?")]))
            }
            BlockInfoState::Listing => {
                let ex = take_one("GetBlockInfo", received)?;
                let mut blocks = Vec::new();
                for line in ex.lines()? {
                    let mut parts = line.split_whitespace();
                    match (parts.next(), parts.next(), parts.next()) {
                        (Some(block), Some(number), None) => {
                            blocks.push((block.to_string(), parse_index(block, number)?))
                        }
                        _ => return Err(CommandError::malformed("*BLOCKS?", line)),
                    }
                }

                if self.skip_description {
                    return Ok(Step::Done(
                        blocks
                            .into_iter()
                            .map(|(block, number)| {
                                (block, BlockInfo { number, description: None })
                            })
                            .collect(),
                    ));
                }

                let batch = blocks
                    .iter()
                    .map(|(block, _)| Get::new(format!("*DESC.{}", block)))
                    .collect();
                self.describe(blocks, batch, Vec::new())
            }
            BlockInfoState::Describing { blocks, batch } => self.describe(blocks, batch, received),
            BlockInfoState::Finished => Err(CommandError::ResumedAfterCompletion("GetBlockInfo")),
        }
    }
}

#[derive(Debug)]
enum FieldInfoState {
    Start,
    Listing,
    Querying {
        fields: Vec<(u32, FieldHandler)>,
        counts: Vec<usize>,
        batch: Batch<Get>,
    },
    Finished,
}

/// Get the fields of a block, returning a [`FieldInfo`] for each one, ordered
/// by the index the server reports for it.
///
/// ```text
/// GetFieldInfo("LUT") -> {
///     "INPA": FieldInfo {
///         field_type: "bit_mux",
///         description: Some("Input A"),
///         labels: Some(["TTLIN1.VAL", "TTLIN2.VAL", ...]),
///         kind: BitMux { max_delay: 5 },
///         ..
///     },
///     ...
/// }
/// ```
#[derive(Debug)]
pub struct GetFieldInfo {
    block: String,
    extended_metadata: bool,
    state: FieldInfoState,
}

impl GetFieldInfo {
    /// Introspect the fields of `block`, with extended metadata.
    pub fn new(block: impl Into<String>) -> Self {
        GetFieldInfo {
            block: block.into(),
            extended_metadata: true,
            state: FieldInfoState::Start,
        }
    }

    /// When `false`, only the type and subtype of each field are returned and
    /// no follow-up round trip is made.
    pub fn extended_metadata(mut self, extended: bool) -> Self {
        self.extended_metadata = extended;
        self
    }

    /// Parse one `name index type[ subtype]` line. The subtype is the rest
    /// of the line after the type.
    fn parse_field_line(&self, line: &str) -> CommandResult<(String, u32, String, Option<String>)> {
        let malformed = || CommandError::malformed(format!("{}.*?", self.block), line);
        let (name, rest) = next_token(line).ok_or_else(malformed)?;
        let (index, rest) = next_token(rest).ok_or_else(malformed)?;
        let (field_type, rest) = next_token(rest).ok_or_else(malformed)?;
        let subtype = Some(rest.trim_end()).filter(|s| !s.is_empty());
        Ok((
            name.to_string(),
            parse_index(name, index)?,
            field_type.to_string(),
            subtype.map(str::to_string),
        ))
    }

    fn query(
        &mut self,
        mut fields: Vec<(u32, FieldHandler)>,
        counts: Vec<usize>,
        mut batch: Batch<Get>,
        received: Vec<Exchange>,
    ) -> CommandResult<Step<IndexMap<String, FieldInfo>>> {
        let values = match batch.resume(received)? {
            Step::Send(exchanges) => {
                self.state = FieldInfoState::Querying { fields, counts, batch };
                return Ok(Step::Send(exchanges));
            }
            Step::Done(values) => values,
        };

        let expected: usize = counts.iter().sum();
        if values.len() != expected || counts.len() != fields.len() {
            return Err(CommandError::ResponseCountMismatch {
                context: format!("GetFieldInfo({})", self.block),
                expected,
                actual: values.len(),
            });
        }

        // Hand each handler exactly the replies to its own queries
        let mut values = values.into_iter();
        let mut infos = Vec::with_capacity(fields.len());
        for ((index, handler), count) in fields.iter_mut().zip(counts) {
            let own: Vec<Value> = values.by_ref().take(count).collect();
            let info = handler.finish(own)?;
            infos.push((*index, handler.name().to_string(), info));
        }
        Ok(Step::Done(sorted_by_index(infos)))
    }
}

fn sorted_by_index(mut infos: Vec<(u32, String, FieldInfo)>) -> IndexMap<String, FieldInfo> {
    infos.sort_by_key(|(index, _, _)| *index);
    infos
        .into_iter()
        .map(|(_, name, info)| (name, info))
        .collect()
}

impl Command for GetFieldInfo {
    type Output = IndexMap<String, FieldInfo>;

    fn resume(&mut self, received: Vec<Exchange>) -> CommandResult<Step<Self::Output>> {
        match std::mem::replace(&mut self.state, FieldInfoState::Finished) {
            FieldInfoState::Start => {
                self.state = FieldInfoState::Listing;
                Ok(Step::Send(vec![Exchange::new(format!("{}.*?", self.block))]))
            }
            FieldInfoState::Listing => {
                let ex = take_one("GetFieldInfo", received)?;
                let mut parsed = Vec::new();
                for line in ex.lines()? {
                    parsed.push(self.parse_field_line(line)?);
                }

                if !self.extended_metadata {
                    let infos = parsed
                        .into_iter()
                        .map(|(name, index, field_type, subtype)| {
                            (index, name, FieldInfo::basic(field_type, subtype))
                        })
                        .collect();
                    return Ok(Step::Done(sorted_by_index(infos)));
                }

                let mut fields = Vec::with_capacity(parsed.len());
                let mut counts = Vec::with_capacity(parsed.len());
                let mut gets = Vec::new();
                for (name, index, field_type, subtype) in parsed {
                    let mut handler =
                        FieldHandler::new(&self.block, &name, &field_type, subtype.as_deref());
                    let declared = handler.declare()?;
                    counts.push(declared.len());
                    gets.extend(declared);
                    fields.push((index, handler));
                }
                self.query(fields, counts, Batch::new(gets), Vec::new())
            }
            FieldInfoState::Querying { fields, counts, batch } => {
                self.query(fields, counts, batch, received)
            }
            FieldInfoState::Finished => Err(CommandError::ResumedAfterCompletion("GetFieldInfo")),
        }
    }
}

#[derive(Debug)]
enum BitsState {
    Start,
    Listing,
    Querying(Vec<String>),
    Finished,
}

/// Get the labels of the bits in each PCAP `ext_out bits` capture word.
///
/// ```text
/// GetPcapBitsLabels -> {"PCAP.BITS0": ["TTLIN1.VAL", "TTLIN2.VAL", ...], ...}
/// ```
#[derive(Debug)]
pub struct GetPcapBitsLabels {
    state: BitsState,
}

impl Default for GetPcapBitsLabels {
    fn default() -> Self {
        Self::new()
    }
}

impl GetPcapBitsLabels {
    /// Create the command.
    pub fn new() -> Self {
        GetPcapBitsLabels {
            state: BitsState::Start,
        }
    }
}

impl Command for GetPcapBitsLabels {
    type Output = IndexMap<String, Vec<String>>;

    fn resume(&mut self, received: Vec<Exchange>) -> CommandResult<Step<Self::Output>> {
        match std::mem::replace(&mut self.state, BitsState::Finished) {
            BitsState::Start => {
                self.state = BitsState::Listing;
                Ok(Step::Send(vec![Exchange::new("PCAP.*?")]))
            }
            BitsState::Listing => {
                let ex = take_one("GetPcapBitsLabels", received)?;
                let bits_fields: Vec<String> = ex
                    .lines()?
                    .iter()
                    .filter_map(|line| {
                        let parts: Vec<&str> = line.split_whitespace().collect();
                        match parts.as_slice() {
                            [name, _, "ext_out", "bits"] => Some(format!("PCAP.{}", name)),
                            _ => None,
                        }
                    })
                    .collect();
                if bits_fields.is_empty() {
                    return Ok(Step::Done(IndexMap::new()));
                }
                let exchanges = bits_fields
                    .iter()
                    .map(|field| Exchange::new(format!("{}.BITS?", field)))
                    .collect();
                self.state = BitsState::Querying(bits_fields);
                Ok(Step::Send(exchanges))
            }
            BitsState::Querying(bits_fields) => {
                crate::commands::expect_count("GetPcapBitsLabels", &received, bits_fields.len())?;
                let mut bits = IndexMap::with_capacity(bits_fields.len());
                for (field, ex) in bits_fields.into_iter().zip(received) {
                    let labels = ex.lines()?.to_vec();
                    bits.insert(field, labels);
                }
                Ok(Step::Done(bits))
            }
            BitsState::Finished => Err(CommandError::ResumedAfterCompletion("GetPcapBitsLabels")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::{line, lines, run_with};
    use crate::responses::{FieldKind, ScalarOffset};

    #[test]
    fn test_block_info_sorted_with_one_description_round() {
        let (sent, out) = run_with(
            GetBlockInfo::new(),
            vec![
                vec![lines(&["PCAP 1", "LUT 8", "CLOCK 2"])],
                vec![
                    line("OK =Position capture control"),
                    line("OK =Lookup table"),
                    line("OK =Clocks"),
                ],
            ],
        );
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1][0], vec!["*DESC.PCAP?"]);
        let out = out.unwrap();
        let names: Vec<&String> = out.keys().collect();
        assert_eq!(names, ["CLOCK", "LUT", "PCAP"]);
        assert_eq!(
            out["LUT"],
            BlockInfo {
                number: 8,
                description: Some("Lookup table".to_string())
            }
        );
    }

    #[test]
    fn test_block_info_skip_description() {
        let (sent, out) = run_with(
            GetBlockInfo::new().skip_description(true),
            vec![vec![lines(&["PCAP 1", "LUT 8"])]],
        );
        assert_eq!(sent.len(), 1);
        assert_eq!(out.unwrap()["PCAP"].description, None);
    }

    #[test]
    fn test_field_info_ordered_by_index() {
        let (sent, out) = run_with(
            GetFieldInfo::new("LUT"),
            vec![
                vec![lines(&[
                    "TYPEA 5 param enum",
                    "INPA 1 bit_mux",
                    "FUNC 0 param lut",
                ])],
                vec![
                    lines(&["Input-Level", "Pulse-On-Rising-Edge"]),
                    line("OK =Source of the value of A"),
                    line("OK =5"),
                    lines(&["TTLIN1.VAL", "ZERO"]),
                    line("OK =Input A"),
                    line("OK =Function"),
                ],
            ],
        );
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[1],
            vec![
                vec!["*ENUMS.LUT.TYPEA?".to_string()],
                vec!["*DESC.LUT.TYPEA?".to_string()],
                vec!["LUT1.INPA.MAX_DELAY?".to_string()],
                vec!["*ENUMS.LUT.INPA?".to_string()],
                vec!["*DESC.LUT.INPA?".to_string()],
                vec!["*DESC.LUT.FUNC?".to_string()],
            ]
        );
        let out = out.unwrap();
        let names: Vec<&String> = out.keys().collect();
        assert_eq!(names, ["FUNC", "INPA", "TYPEA"]);
        assert_eq!(out["FUNC"].kind, FieldKind::Basic);
        assert_eq!(out["FUNC"].description.as_deref(), Some("Function"));
        assert_eq!(out["INPA"].kind, FieldKind::BitMux { max_delay: 5 });
        assert_eq!(
            out["TYPEA"].labels.as_deref(),
            Some(&["Input-Level".to_string(), "Pulse-On-Rising-Edge".to_string()][..])
        );
    }

    #[test]
    fn test_field_info_without_extended_metadata() {
        let (sent, out) = run_with(
            GetFieldInfo::new("INENC").extended_metadata(false),
            vec![vec![lines(&["VAL 2 param scalar", "CLK 1 bit_mux"])]],
        );
        assert_eq!(sent.len(), 1);
        let out = out.unwrap();
        assert_eq!(
            out.get_index(0).map(|(k, v)| (k.as_str(), v.clone())),
            Some(("CLK", FieldInfo::basic("bit_mux", None)))
        );
        assert_eq!(out["VAL"].subtype.as_deref(), Some("scalar"));
        assert_eq!(out["VAL"].description, None);
    }

    #[test]
    fn test_field_info_scalar() {
        let (_, out) = run_with(
            GetFieldInfo::new("INENC"),
            vec![
                vec![lines(&["VAL 0 read scalar"])],
                vec![
                    line("OK =mm"),
                    line("OK =0.001"),
                    line("OK =12.5"),
                    line("OK =Current position"),
                ],
            ],
        );
        assert_eq!(
            out.unwrap()["VAL"].kind,
            FieldKind::Scalar {
                units: "mm".to_string(),
                scale: 0.001,
                offset: ScalarOffset::Float(12.5),
            }
        );
    }

    #[test]
    fn test_pcap_bits_labels() {
        let (sent, out) = run_with(
            GetPcapBitsLabels::new(),
            vec![
                vec![lines(&[
                    "BITS0 10 ext_out bits",
                    "TS_START 3 ext_out timestamp",
                    "ACTIVE 4 bit_out",
                    "BITS1 11 ext_out bits",
                ])],
                vec![lines(&["TTLIN1.VAL", "TTLIN2.VAL"]), lines(&["LVDSIN1.VAL"])],
            ],
        );
        assert_eq!(sent[1][0], vec!["PCAP.BITS0.BITS?"]);
        assert_eq!(sent[1][1], vec!["PCAP.BITS1.BITS?"]);
        let out = out.unwrap();
        assert_eq!(out["PCAP.BITS0"], vec!["TTLIN1.VAL", "TTLIN2.VAL"]);
        assert_eq!(out["PCAP.BITS1"], vec!["LVDSIN1.VAL"]);
    }

    #[test]
    fn test_subtype_keeps_rest_of_line() {
        let command = GetFieldInfo::new("X");
        let (name, index, field_type, subtype) =
            command.parse_field_line("OUT  3 ext_out  bits extra").unwrap();
        assert_eq!((name.as_str(), index, field_type.as_str()), ("OUT", 3, "ext_out"));
        assert_eq!(subtype.as_deref(), Some("bits extra"));

        let (_, _, field_type, subtype) = command.parse_field_line("CLK 1 bit_mux ").unwrap();
        assert_eq!(field_type, "bit_mux");
        assert_eq!(subtype, None);

        assert!(command.parse_field_line("CLK 1").is_err());
        assert!(command.parse_field_line("CLK one bit_mux").is_err());
    }

    #[test]
    fn test_field_info_routes_replies_per_field() {
        let (sent, out) = run_with(
            GetFieldInfo::new("PCAP"),
            vec![
                vec![lines(&[
                    "BITS0 3 ext_out bits",
                    "ACTIVE 0 bit_out",
                    "TS_END 2 ext_out timestamp",
                    "ENABLE 1 bit_mux",
                    "SHIFT_SUM 4 param uint",
                ])],
                vec![
                    // BITS0
                    lines(&["TTLIN1.VAL", "TTLIN2.VAL"]),
                    lines(&["No", "Value"]),
                    line("OK =Quadrant 0 of bit_bus"),
                    // ACTIVE
                    line("OK =PCAP.BITS1"),
                    line("OK =4"),
                    line("OK =Data capture in progress"),
                    // TS_END
                    lines(&["No", "Value", "Diff"]),
                    line("OK =Timestamp of capture end"),
                    // ENABLE
                    line("OK =31"),
                    lines(&["ZERO", "ONE"]),
                    line("OK =Capture enable"),
                    // SHIFT_SUM
                    line("OK =8"),
                    line("OK =Shift sum"),
                ],
            ],
        );
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].len(), 13);
        assert_eq!(sent[1][0], vec!["PCAP.BITS0.BITS?"]);
        assert_eq!(sent[1][3], vec!["PCAP1.ACTIVE.CAPTURE_WORD?"]);
        assert_eq!(sent[1][8], vec!["PCAP1.ENABLE.MAX_DELAY?"]);
        assert_eq!(sent[1][11], vec!["PCAP1.SHIFT_SUM.MAX?"]);

        let out = out.unwrap();
        let names: Vec<&String> = out.keys().collect();
        assert_eq!(names, ["ACTIVE", "ENABLE", "TS_END", "BITS0", "SHIFT_SUM"]);
        assert_eq!(
            out["BITS0"].kind,
            FieldKind::ExtOutBits {
                bits: vec!["TTLIN1.VAL".to_string(), "TTLIN2.VAL".to_string()],
                capture_labels: vec!["No".to_string(), "Value".to_string()],
            }
        );
        assert_eq!(
            out["ACTIVE"].kind,
            FieldKind::BitOut {
                capture_word: "PCAP.BITS1".to_string(),
                offset: 4,
            }
        );
        assert_eq!(
            out["ACTIVE"].description.as_deref(),
            Some("Data capture in progress")
        );
        assert_eq!(
            out["TS_END"].kind,
            FieldKind::ExtOut {
                capture_labels: vec!["No".to_string(), "Value".to_string(), "Diff".to_string()],
            }
        );
        assert_eq!(out["ENABLE"].kind, FieldKind::BitMux { max_delay: 31 });
        assert_eq!(
            out["ENABLE"].labels,
            Some(vec!["ZERO".to_string(), "ONE".to_string()])
        );
        assert_eq!(out["SHIFT_SUM"].kind, FieldKind::Uint { max: 8 });
        assert_eq!(out["SHIFT_SUM"].description.as_deref(), Some("Shift sum"));
    }
}
