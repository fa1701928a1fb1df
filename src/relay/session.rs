//! Session coordinator
//!
//! Runs both relay directions on their own threads and returns as soon as
//! either one finishes. The other direction is not cancelled; it stops on
//! its own once its stream fails or is closed at teardown.

use crate::relay::convert::{Converter, LineEnding};
use crate::relay::copy::{copy_loop, Direction, Termination};
use anyhow::{Context, Result};
use log::debug;
use std::io::{Read, Write};
use std::sync::mpsc;
use std::thread;

/// Conversion settings for one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionConfig {
    /// Token sent to the device for each console `\n`
    pub eol: LineEnding,
    /// Disable conversion in both directions
    pub raw: bool,
}

impl SessionConfig {
    /// Fresh `(outbound, inbound)` converters for a new session
    pub fn converters(&self) -> (Converter, Converter) {
        if self.raw {
            (Converter::NoConversion, Converter::NoConversion)
        } else {
            (Converter::outbound(self.eol), Converter::inbound())
        }
    }
}

/// The first direction to finish and why
#[derive(Debug)]
pub struct SessionEnd {
    pub direction: Direction,
    pub termination: Termination,
}

pub struct Session {
    config: SessionConfig,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    /// Relay until either direction terminates
    ///
    /// Errors only if a relay thread could not be started.
    pub fn run<CI, CO, DI, DO>(
        &self,
        console_in: CI,
        console_out: CO,
        device_in: DI,
        device_out: DO,
    ) -> Result<SessionEnd>
    where
        CI: Read + Send + 'static,
        CO: Write + Send + 'static,
        DI: Read + Send + 'static,
        DO: Write + Send + 'static,
    {
        let (outbound, inbound) = self.config.converters();
        let (done_tx, done_rx) = mpsc::channel();

        spawn_direction(
            Direction::ConsoleToDevice,
            console_in,
            device_out,
            outbound,
            done_tx.clone(),
        )?;
        spawn_direction(
            Direction::DeviceToConsole,
            device_in,
            console_out,
            inbound,
            done_tx,
        )?;

        // Each thread sends exactly once, even if its loop panicked.
        let (direction, termination) = done_rx
            .recv()
            .context("Relay threads exited without reporting")?;
        debug!("Session ended by {} ({:?})", direction, termination);

        Ok(SessionEnd {
            direction,
            termination,
        })
    }
}

fn spawn_direction<R, W>(
    direction: Direction,
    source: R,
    destination: W,
    converter: Converter,
    done: mpsc::Sender<(Direction, Termination)>,
) -> Result<()>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    thread::Builder::new()
        .name(direction.to_string())
        .spawn(move || {
            let termination = copy_loop(source, destination, converter, direction);
            // The coordinator stops listening after the first report.
            let _ = done.send((direction, termination));
        })
        .with_context(|| format!("Failed to start {} relay", direction))?;
    Ok(())
}

/// Run one session with the given conversion settings
pub fn run_session<CI, CO, DI, DO>(
    console_in: CI,
    console_out: CO,
    device_in: DI,
    device_out: DO,
    config: SessionConfig,
) -> Result<SessionEnd>
where
    CI: Read + Send + 'static,
    CO: Write + Send + 'static,
    DI: Read + Send + 'static,
    DO: Write + Send + 'static,
{
    Session::new(config).run(console_in, console_out, device_in, device_out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::copy::tests::ScriptedReader;
    use std::io::{self, Cursor, ErrorKind};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Writer whose contents can be inspected from the test thread
    #[derive(Clone, Default)]
    struct SharedWriter(Arc<Mutex<Vec<u8>>>);

    impl SharedWriter {
        fn contents(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Write for SharedWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Reader that blocks until the test feeds it or drops the feeder
    struct BlockingReader(mpsc::Receiver<Vec<u8>>);

    impl Read for BlockingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.recv() {
                Ok(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                Err(_) => Ok(0),
            }
        }
    }

    fn wait_for(writer: &SharedWriter, expected: &[u8]) {
        for _ in 0..200 {
            if writer.contents() == expected {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(writer.contents(), expected);
    }

    #[test]
    fn test_converters_follow_config() {
        let config = SessionConfig {
            eol: LineEnding::Cr,
            raw: false,
        };
        let (outbound, inbound) = config.converters();
        assert_eq!(outbound, Converter::OutboundExpand(LineEnding::Cr));
        assert_eq!(inbound, Converter::inbound());

        let raw = SessionConfig {
            eol: LineEnding::Cr,
            raw: true,
        };
        assert_eq!(
            raw.converters(),
            (Converter::NoConversion, Converter::NoConversion)
        );
    }

    #[test]
    fn test_console_eof_ends_session_without_waiting_for_device() {
        let (_feed, device_rx) = mpsc::channel::<Vec<u8>>();
        let device_out = SharedWriter::default();
        let console_out = SharedWriter::default();

        let end = run_session(
            Cursor::new(b"AT\n".to_vec()),
            console_out.clone(),
            BlockingReader(device_rx),
            device_out.clone(),
            SessionConfig::default(),
        )
        .unwrap();

        assert_eq!(end.direction, Direction::ConsoleToDevice);
        assert!(matches!(
            end.termination,
            Termination::ClosedCleanly { side: "Console" }
        ));
        assert_eq!(device_out.contents(), b"AT\r\n");
        assert!(console_out.contents().is_empty());
    }

    #[test]
    fn test_device_failure_ends_session() {
        let (_feed, console_rx) = mpsc::channel::<Vec<u8>>();
        let console_out = SharedWriter::default();

        let end = run_session(
            BlockingReader(console_rx),
            console_out.clone(),
            ScriptedReader::new(vec![
                Ok(b"OK\r\n".to_vec()),
                Err(ErrorKind::BrokenPipe),
            ]),
            SharedWriter::default(),
            SessionConfig::default(),
        )
        .unwrap();

        assert_eq!(end.direction, Direction::DeviceToConsole);
        assert!(matches!(
            end.termination,
            Termination::IoFailure {
                side: "Serial port",
                ..
            }
        ));
        assert_eq!(console_out.contents(), b"OK\n");
    }

    #[test]
    fn test_both_directions_relay_concurrently() {
        let (console_feed, console_rx) = mpsc::channel::<Vec<u8>>();
        let (device_feed, device_rx) = mpsc::channel::<Vec<u8>>();
        let console_out = SharedWriter::default();
        let device_out = SharedWriter::default();

        let session = {
            let console_out = console_out.clone();
            let device_out = device_out.clone();
            thread::spawn(move || {
                run_session(
                    BlockingReader(console_rx),
                    console_out,
                    BlockingReader(device_rx),
                    device_out,
                    SessionConfig::default(),
                )
            })
        };

        device_feed.send(b"U-Boot 2024\r".to_vec()).unwrap();
        device_feed.send(b"\n=> ".to_vec()).unwrap();
        wait_for(&console_out, b"U-Boot 2024\n=> ");

        console_feed.send(b"boot\n".to_vec()).unwrap();
        wait_for(&device_out, b"boot\r\n");

        drop(console_feed);
        let end = session.join().unwrap().unwrap();
        assert_eq!(end.direction, Direction::ConsoleToDevice);
        assert!(end.termination.is_clean());
        drop(device_feed);
    }

    #[test]
    fn test_raw_session_passes_bytes_unchanged() {
        let (_feed, device_rx) = mpsc::channel::<Vec<u8>>();
        let device_out = SharedWriter::default();

        run_session(
            Cursor::new(b"a\nb\r\n".to_vec()),
            SharedWriter::default(),
            BlockingReader(device_rx),
            device_out.clone(),
            SessionConfig {
                eol: LineEnding::CrLf,
                raw: true,
            },
        )
        .unwrap();

        assert_eq!(device_out.contents(), b"a\nb\r\n");
    }
}
