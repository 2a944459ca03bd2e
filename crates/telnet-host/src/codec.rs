// Copyright (C) 2025 AmbonMUD contributors. This program is free software:
// you can redistribute it and/or modify it under the terms of the GNU General
// Public License as published by the Free Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Byte-oriented line decoder for telnet connections. A single-byte state
//! machine consumes IAC negotiation sequences, accumulates printable input
//! and enforces the line-length and non-printable limits. Violations
//! disconnect the session before anything reaches the engine.

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio_util::codec::Decoder;

const IAC: u8 = 0xFF;
// IAC WILL/WONT/DO/DONT carry one option byte after the command.
const IAC_WILL: u8 = 251;
const IAC_DONT: u8 = 254;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("line exceeds {0} bytes")]
    LineTooLong(usize),
    #[error("too many non-printable bytes in one line")]
    NonPrintableFlood,
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ProtocolViolation {
    fn from(e: std::io::Error) -> Self {
        ProtocolViolation::Io(e.to_string())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum DecodeState {
    Data,
    Iac,
    IacCmd,
}

pub struct LineDecoder {
    state: DecodeState,
    buf: Vec<u8>,
    non_printable: usize,
    max_line_len: usize,
    max_non_printable_per_line: usize,
}

impl LineDecoder {
    pub fn new(max_line_len: usize, max_non_printable_per_line: usize) -> Self {
        Self {
            state: DecodeState::Data,
            buf: Vec::new(),
            non_printable: 0,
            max_line_len,
            max_non_printable_per_line,
        }
    }

    fn is_printable(byte: u8) -> bool {
        (0x20..=0x7E).contains(&byte) || byte == b'\t' || byte == b'\r'
    }

    /// Feeds one byte; `Ok(Some(line))` when a full line is complete.
    fn push(&mut self, byte: u8) -> Result<Option<String>, ProtocolViolation> {
        match self.state {
            DecodeState::Iac => {
                self.state = if (IAC_WILL..=IAC_DONT).contains(&byte) {
                    DecodeState::IacCmd
                } else {
                    DecodeState::Data
                };
                Ok(None)
            }
            DecodeState::IacCmd => {
                self.state = DecodeState::Data;
                Ok(None)
            }
            DecodeState::Data => match byte {
                IAC => {
                    self.state = DecodeState::Iac;
                    Ok(None)
                }
                b'\n' => {
                    let line = String::from_utf8_lossy(&self.buf).into_owned();
                    self.buf.clear();
                    self.non_printable = 0;
                    Ok(Some(line))
                }
                // Trailing carriage returns are trimmed at emission; never
                // buffering them keeps the length limit exact.
                b'\r' => Ok(None),
                byte => {
                    if !Self::is_printable(byte) {
                        self.non_printable += 1;
                        if self.non_printable > self.max_non_printable_per_line {
                            return Err(ProtocolViolation::NonPrintableFlood);
                        }
                    }
                    if self.buf.len() >= self.max_line_len {
                        return Err(ProtocolViolation::LineTooLong(self.max_line_len));
                    }
                    self.buf.push(byte);
                    Ok(None)
                }
            },
        }
    }
}

impl Decoder for LineDecoder {
    type Item = String;
    type Error = ProtocolViolation;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, ProtocolViolation> {
        while src.has_remaining() {
            let byte = src.get_u8();
            if let Some(line) = self.push(byte)? {
                return Ok(Some(line));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn decode_all(decoder: &mut LineDecoder, bytes: &[u8]) -> Vec<String> {
        let mut src = BytesMut::from(bytes);
        let mut lines = Vec::new();
        while let Some(line) = decoder.decode(&mut src).unwrap() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn splits_lines_and_trims_cr() {
        let mut decoder = LineDecoder::new(512, 8);
        let lines = decode_all(&mut decoder, b"look\r\nnorth\n");
        assert_eq!(lines, vec!["look".to_string(), "north".to_string()]);
    }

    #[test]
    fn partial_lines_wait_for_more_bytes() {
        let mut decoder = LineDecoder::new(512, 8);
        assert!(decode_all(&mut decoder, b"hel").is_empty());
        let lines = decode_all(&mut decoder, b"lo\n");
        assert_eq!(lines, vec!["hello".to_string()]);
    }

    #[test]
    fn iac_sequences_are_consumed() {
        let mut decoder = LineDecoder::new(512, 0);
        // IAC WILL <option> mid-line, and IAC NOP (two bytes).
        let lines = decode_all(&mut decoder, &[b'h', IAC, 251, 31, b'i', IAC, 241, b'\n']);
        assert_eq!(lines, vec!["hi".to_string()]);
    }

    #[test]
    fn line_at_limit_is_accepted_one_over_is_not() {
        let mut decoder = LineDecoder::new(8, 8);
        let lines = decode_all(&mut decoder, b"12345678\n");
        assert_eq!(lines, vec!["12345678".to_string()]);

        let mut decoder = LineDecoder::new(8, 8);
        let mut src = BytesMut::from(&b"123456789\n"[..]);
        assert_eq!(
            decoder.decode(&mut src).unwrap_err(),
            ProtocolViolation::LineTooLong(8)
        );
    }

    #[test]
    fn non_printable_budget_is_exact() {
        let mut decoder = LineDecoder::new(512, 2);
        let lines = decode_all(&mut decoder, &[b'a', 0x01, 0x02, b'b', b'\n']);
        assert_eq!(lines, vec![String::from_utf8_lossy(&[b'a', 0x01, 0x02, b'b']).into_owned()]);

        let mut decoder = LineDecoder::new(512, 2);
        let mut src = BytesMut::from(&[b'a', 0x01, 0x02, 0x03, b'\n'][..]);
        assert_eq!(
            decoder.decode(&mut src).unwrap_err(),
            ProtocolViolation::NonPrintableFlood
        );
    }

    #[test]
    fn counters_reset_per_line() {
        let mut decoder = LineDecoder::new(4, 1);
        let lines = decode_all(&mut decoder, b"abcd\nefgh\n");
        assert_eq!(lines, vec!["abcd".to_string(), "efgh".to_string()]);
    }
}
