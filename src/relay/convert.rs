//! Line-ending converters
//!
//! Two converters sit between the console and the device:
//! - **Outbound** (console -> device) expands every `\n` into the configured
//!   end-of-line token. Stateless.
//! - **Inbound** (device -> console) collapses `\r`, `\n` and `\r\n` into a
//!   single `\n`. A `\r` at the end of one chunk is held in [`InboundState`]
//!   and classified by the first byte of the next chunk.
//!
//! Converters never block and never look past the bytes they are given.

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const CR: u8 = b'\r';
const LF: u8 = b'\n';

/// End-of-line token sent to the device in place of `\n`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum LineEnding {
    /// Carriage return only (`\r`)
    Cr,
    /// Line feed only (`\n`)
    Lf,
    /// Carriage return followed by line feed (`\r\n`)
    #[default]
    CrLf,
}

impl LineEnding {
    /// Bytes substituted for each outbound `\n`
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            LineEnding::Cr => b"\r",
            LineEnding::Lf => b"\n",
            LineEnding::CrLf => b"\r\n",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LineEnding::Cr => "cr",
            LineEnding::Lf => "lf",
            LineEnding::CrLf => "crlf",
        }
    }
}

impl fmt::Display for LineEnding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unknown end-of-line name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown line ending '{0}' (expected cr, lf or crlf)")]
pub struct ParseLineEndingError(pub String);

impl FromStr for LineEnding {
    type Err = ParseLineEndingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cr" | "\\r" | "\r" | "mac" => Ok(LineEnding::Cr),
            "lf" | "\\n" | "\n" | "unix" => Ok(LineEnding::Lf),
            "crlf" | "\\r\\n" | "\r\n" | "dos" => Ok(LineEnding::CrLf),
            _ => Err(ParseLineEndingError(s.to_string())),
        }
    }
}

impl TryFrom<String> for LineEnding {
    type Error = ParseLineEndingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Latched state of the inbound converter
///
/// One instance per direction per session; never shared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InboundState {
    pending_cr: bool,
}

impl InboundState {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if the last byte seen was a `\r` not yet classified
    #[cfg(test)]
    pub fn is_pending_cr(&self) -> bool {
        self.pending_cr
    }

    fn push(&mut self, byte: u8, output: &mut Vec<u8>) {
        match (byte, self.pending_cr) {
            (CR, false) => self.pending_cr = true,
            // The latch stays set, so the last CR of a run is still held.
            (CR, true) => output.push(LF),
            (LF, _) => {
                output.push(LF);
                self.pending_cr = false;
            }
            (other, true) => {
                output.push(LF);
                output.push(other);
                self.pending_cr = false;
            }
            (other, false) => output.push(other),
        }
    }
}

/// Replace every `\n` in `input` with `eol`, appending to `output`
pub fn expand_line_endings(input: &[u8], eol: LineEnding, output: &mut Vec<u8>) {
    let token = eol.as_bytes();
    for &byte in input {
        if byte == LF {
            output.extend_from_slice(token);
        } else {
            output.push(byte);
        }
    }
}

/// Collapse `\r`, `\n` and `\r\n` in `input` into `\n`, appending to `output`
pub fn normalize_line_endings(input: &[u8], state: &mut InboundState, output: &mut Vec<u8>) {
    for &byte in input {
        state.push(byte, output);
    }
}

/// Converts one chunk of a direction's byte stream
///
/// `output` is cleared and refilled; the returned slice borrows from it so a
/// caller can reuse the same buffer for every chunk.
pub trait LineConvert: Send {
    fn convert<'a>(&mut self, input: &[u8], output: &'a mut Vec<u8>) -> &'a [u8];
}

/// The converters a relay direction can run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Converter {
    /// Bytes pass through unchanged
    NoConversion,
    /// Console -> device: `\n` becomes the end-of-line token
    OutboundExpand(LineEnding),
    /// Device -> console: any line ending becomes `\n`
    InboundNormalize(InboundState),
}

impl Converter {
    pub fn outbound(eol: LineEnding) -> Self {
        Converter::OutboundExpand(eol)
    }

    pub fn inbound() -> Self {
        Converter::InboundNormalize(InboundState::new())
    }
}

impl LineConvert for Converter {
    fn convert<'a>(&mut self, input: &[u8], output: &'a mut Vec<u8>) -> &'a [u8] {
        output.clear();
        match self {
            Converter::NoConversion => output.extend_from_slice(input),
            Converter::OutboundExpand(eol) => expand_line_endings(input, *eol, output),
            Converter::InboundNormalize(state) => normalize_line_endings(input, state, output),
        }
        output.as_slice()
    }
}
