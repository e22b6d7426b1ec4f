//! Line-based codec for the control port.
//!
//! Requests are newline terminated lines. Every request gets exactly one
//! reply, which is either a single line (`OK`, `OK =value`, `ERR ...`) or a
//! block of lines each prefixed with `!` and closed by a lone `.`:
//!
//! ```text
//! -> SEQ1.TABLE?
//! <- !1048576
//! <- !0
//! <- .
//! ```
//!
//! The codec does no IO. Transports feed it whatever bytes arrive with
//! [`ControlCodec::push`] and pull replies out with [`ControlCodec::decode`].

use bytes::BytesMut;

use crate::error::{CommandError, CommandResult};
use crate::exchange::Response;

/// Default TCP port of the control server.
pub const DEFAULT_CONTROL_PORT: u16 = 8888;

/// Initial receive buffer capacity.
const BUFFER_CAPACITY: usize = 4096;

/// A codec for writing request batches and reading replies.
#[derive(Debug)]
pub struct ControlCodec {
    /// Bytes received but not yet split into lines.
    buffer: BytesMut,
    /// Lines of a multiline reply that has not been closed yet.
    partial: Option<Vec<String>>,
    /// Replies still owed for requests already encoded.
    outstanding: usize,
}

impl Default for ControlCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlCodec {
    /// Create a new codec with nothing outstanding.
    pub fn new() -> Self {
        ControlCodec {
            buffer: BytesMut::with_capacity(BUFFER_CAPACITY),
            partial: None,
            outstanding: 0,
        }
    }

    /// Encode a batch of requests for transmission.
    ///
    /// Each request is one or more lines; each line gets a `\n` terminator.
    /// One reply is expected per request.
    pub fn encode_batch(&mut self, requests: &[Vec<String>]) -> Vec<u8> {
        let len = requests.iter().flatten().map(|line| line.len() + 1).sum();
        let mut buf = Vec::with_capacity(len);
        for line in requests.iter().flatten() {
            buf.extend_from_slice(line.as_bytes());
            buf.push(b'\n');
        }
        self.outstanding += requests.len();
        buf
    }

    /// Add received data to the buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Number of replies still owed by the device.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Get the number of buffered bytes.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Forget everything buffered and outstanding.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.partial = None;
        self.outstanding = 0;
    }

    fn next_line(&mut self) -> CommandResult<Option<String>> {
        let Some(end) = self.buffer.iter().position(|&b| b == b'\n') else {
            return Ok(None);
        };
        let mut line = self.buffer.split_to(end + 1);
        line.truncate(end);
        if line.last() == Some(&b'\r') {
            line.truncate(end - 1);
        }
        match String::from_utf8(line.to_vec()) {
            Ok(line) => Ok(Some(line)),
            Err(e) => Err(CommandError::InvalidUtf8(
                String::from_utf8_lossy(e.as_bytes()).into_owned(),
            )),
        }
    }

    /// Try to decode the next complete reply from the buffer.
    ///
    /// Returns `Ok(None)` if more data is needed. A line arriving while no
    /// reply is owed, or one that is not UTF-8, is an error.
    pub fn decode(&mut self) -> CommandResult<Option<Response>> {
        while let Some(line) = self.next_line()? {
            if self.outstanding == 0 {
                return Err(CommandError::UnexpectedLine(line));
            }
            if let Some(value) = line.strip_prefix('!') {
                self.partial
                    .get_or_insert_with(Vec::new)
                    .push(value.to_string());
                continue;
            }
            let response = match (line.as_str(), self.partial.take()) {
                (".", Some(lines)) => Response::Lines(lines),
                // A block with no lines at all
                (".", None) => Response::Lines(Vec::new()),
                (_, Some(lines)) => {
                    self.partial = Some(lines);
                    return Err(CommandError::UnexpectedLine(line));
                }
                (_, None) => Response::Line(line),
            };
            self.outstanding -= 1;
            return Ok(Some(response));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_encode_batch() {
        let mut codec = ControlCodec::new();
        let encoded = codec.encode_batch(&[
            request(&["PCAP.ACTIVE?"]),
            request(&["SEQ1.TABLE<", "1", "2", ""]),
        ]);
        assert_eq!(encoded, b"PCAP.ACTIVE?\nSEQ1.TABLE<\n1\n2\n\n");
        assert_eq!(codec.outstanding(), 2);
    }

    #[test]
    fn test_decode_single_and_multiline() {
        let mut codec = ControlCodec::new();
        codec.encode_batch(&[request(&["A?"]), request(&["B?"])]);
        codec.push(b"OK =1\n!x\n!y\n.\n");
        assert_eq!(
            codec.decode().unwrap(),
            Some(Response::Line("OK =1".to_string()))
        );
        assert_eq!(
            codec.decode().unwrap(),
            Some(Response::Lines(vec!["x".to_string(), "y".to_string()]))
        );
        assert_eq!(codec.decode().unwrap(), None);
        assert_eq!(codec.outstanding(), 0);
    }

    #[test]
    fn test_partial_reply() {
        let mut codec = ControlCodec::new();
        codec.encode_batch(&[request(&["SEQ1.TABLE?"])]);
        codec.push(b"!1\n!");
        assert_eq!(codec.decode().unwrap(), None);
        codec.push(b"2\r\n.");
        assert_eq!(codec.decode().unwrap(), None);
        codec.push(b"\n");
        assert_eq!(
            codec.decode().unwrap(),
            Some(Response::Lines(vec!["1".to_string(), "2".to_string()]))
        );
        assert_eq!(codec.buffered_len(), 0);
    }

    #[test]
    fn test_empty_block() {
        let mut codec = ControlCodec::new();
        codec.encode_batch(&[request(&["*CHANGES?"])]);
        codec.push(b".\n");
        assert_eq!(codec.decode().unwrap(), Some(Response::Lines(Vec::new())));
    }

    #[test]
    fn test_unexpected_line() {
        let mut codec = ControlCodec::new();
        codec.push(b"OK\n");
        assert_eq!(
            codec.decode(),
            Err(CommandError::UnexpectedLine("OK".to_string()))
        );
    }

    #[test]
    fn test_unterminated_block_interrupted() {
        let mut codec = ControlCodec::new();
        codec.encode_batch(&[request(&["SEQ1.TABLE?"])]);
        codec.push(b"!1\nOK\n");
        assert!(codec.decode().is_err());
    }

    #[test]
    fn test_invalid_utf8_is_rejected() {
        let mut codec = ControlCodec::new();
        codec.encode_batch(&[request(&["*IDN?"])]);
        codec.push(b"OK =PandA \xff\n");
        assert_eq!(
            codec.decode(),
            Err(CommandError::InvalidUtf8("OK =PandA \u{FFFD}".to_string()))
        );
    }
}
