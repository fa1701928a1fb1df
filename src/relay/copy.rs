//! One direction of the relay
//!
//! [`copy_loop`] reads a chunk from the source, converts it and writes the
//! result fully to the destination until the source ends or either side
//! fails. The outcome is a [`Termination`], which is logged once by
//! [`report_termination`] and never handed to the other direction.

use crate::relay::convert::LineConvert;
use log::{error, info, trace};
use std::any::Any;
use std::fmt;
use std::io::{self, ErrorKind, Read, Write};
use std::panic::{self, AssertUnwindSafe};

/// Bytes staged per read
pub const INPUT_CHUNK: usize = 1024;

/// Converted bytes staged per write; CRLF expansion can double a chunk
pub const OUTPUT_CHUNK: usize = 2 * INPUT_CHUNK;

/// A relay path between the console and the serial device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    ConsoleToDevice,
    DeviceToConsole,
}

impl Direction {
    /// Human-readable name of the side bytes are read from
    pub fn source(&self) -> &'static str {
        match self {
            Direction::ConsoleToDevice => "Console",
            Direction::DeviceToConsole => "Serial port",
        }
    }

    /// Human-readable name of the side bytes are written to
    pub fn destination(&self) -> &'static str {
        match self {
            Direction::ConsoleToDevice => "Serial port",
            Direction::DeviceToConsole => "Console",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ConsoleToDevice => f.write_str("console->device"),
            Direction::DeviceToConsole => f.write_str("device->console"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
}

/// Why a copy loop stopped
#[derive(Debug)]
pub enum Termination {
    /// `side` reached end-of-stream or stopped accepting bytes
    ClosedCleanly { side: &'static str },
    /// Any other read or write failure on `side`
    IoFailure {
        side: &'static str,
        operation: Operation,
        error: io::Error,
    },
    /// A panic inside the loop, caught at the loop boundary
    InternalFault { message: String },
}

impl Termination {
    pub fn is_clean(&self) -> bool {
        matches!(self, Termination::ClosedCleanly { .. })
    }
}

/// Relay `source` to `destination` through `converter` until termination
///
/// Always returns exactly once, including when the loop body panics, and
/// logs the outcome before returning.
pub fn copy_loop<R, W, C>(
    mut source: R,
    mut destination: W,
    mut converter: C,
    direction: Direction,
) -> Termination
where
    R: Read,
    W: Write,
    C: LineConvert,
{
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        relay(&mut source, &mut destination, &mut converter, direction)
    }));

    let termination = match outcome {
        Ok(termination) => termination,
        Err(payload) => Termination::InternalFault {
            message: panic_message(payload.as_ref()),
        },
    };

    report_termination(direction, &termination);
    termination
}

fn relay<R, W, C>(
    source: &mut R,
    destination: &mut W,
    converter: &mut C,
    direction: Direction,
) -> Termination
where
    R: Read,
    W: Write,
    C: LineConvert,
{
    let mut input = vec![0u8; INPUT_CHUNK];
    let mut output = Vec::with_capacity(OUTPUT_CHUNK);

    loop {
        let count = match source.read(&mut input) {
            Ok(0) => {
                return Termination::ClosedCleanly {
                    side: direction.source(),
                }
            }
            Ok(count) => count,
            Err(e) if is_idle_read(&e) => continue,
            Err(error) => {
                return Termination::IoFailure {
                    side: direction.source(),
                    operation: Operation::Read,
                    error,
                }
            }
        };

        let converted = converter.convert(&input[..count], &mut output);
        trace!("{}: read {} bytes, writing {}", direction, count, converted.len());

        if converted.is_empty() {
            continue;
        }
        if let Err(termination) = write_fully(destination, converted, direction) {
            return termination;
        }
    }
}

/// Write all of `bytes`, retrying partial writes, then flush
fn write_fully<W: Write>(
    destination: &mut W,
    mut bytes: &[u8],
    direction: Direction,
) -> Result<(), Termination> {
    while !bytes.is_empty() {
        match destination.write(bytes) {
            Ok(0) => {
                return Err(Termination::ClosedCleanly {
                    side: direction.destination(),
                })
            }
            Ok(written) => bytes = &bytes[written..],
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(error) => return Err(write_failure(error, direction)),
        }
    }

    destination
        .flush()
        .map_err(|error| write_failure(error, direction))
}

fn write_failure(error: io::Error, direction: Direction) -> Termination {
    match error.kind() {
        ErrorKind::BrokenPipe | ErrorKind::WriteZero | ErrorKind::UnexpectedEof => {
            Termination::ClosedCleanly {
                side: direction.destination(),
            }
        }
        _ => Termination::IoFailure {
            side: direction.destination(),
            operation: Operation::Write,
            error,
        },
    }
}

/// Read errors meaning "no data yet" rather than a failed stream.
/// Serial ports report an idle read timeout as `TimedOut`.
fn is_idle_read(error: &io::Error) -> bool {
    matches!(error.kind(), ErrorKind::Interrupted | ErrorKind::TimedOut)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Emit the one diagnostic line for a finished direction
pub fn report_termination(direction: Direction, termination: &Termination) {
    match termination {
        Termination::ClosedCleanly { side } => info!("{} closed", side),
        Termination::IoFailure {
            side,
            operation: Operation::Read,
            error,
        } => error!("Error reading from {}: {}", side.to_lowercase(), error),
        Termination::IoFailure {
            side,
            operation: Operation::Write,
            error,
        } => error!("Error writing to {}: {}", side.to_lowercase(), error),
        Termination::InternalFault { message } => {
            error!("Unhandled fault in {} relay: {}", direction, message)
        }
    }
}
