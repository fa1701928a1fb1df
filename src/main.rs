//! VCom
//!
//! An extremely small serial terminal. Bytes typed on the console are sent to
//! the serial device and bytes received from the device are printed on the
//! console, with line endings translated in both directions.
//!
//! # Usage
//!
//! ```bash
//! # Connect at the default 19200 8N1 on /dev/ttyS0
//! vcom
//!
//! # Connect to a USB adapter at 115200, sending CR for Enter
//! vcom -d /dev/ttyUSB0 -b 115200 --eol cr
//!
//! # Pass bytes through untouched
//! vcom -d /dev/ttyUSB0 --raw
//!
//! # List available serial ports
//! vcom --list
//! ```
//!
//! The session ends when either the console input or the device closes.

mod config;
mod relay;
mod serial;

use anyhow::Result;
use clap::Parser;
use log::{debug, info};
use std::io;
use std::path::PathBuf;

use config::{Overrides, Settings, VcomConfig};
use relay::{run_session, LineEnding};

/// VCom is a very small serial terminal.
#[derive(Parser)]
#[command(name = "vcom")]
#[command(version)]
#[command(about = "VCom is a very small serial terminal")]
struct Cli {
    /// Serial device to use [default: /dev/ttyS0]
    #[arg(short, long)]
    device: Option<String>,

    /// Baud rate [default: 19200]
    #[arg(short, long)]
    baud: Option<u32>,

    /// Data bits [default: 8]
    #[arg(long = "data")]
    data_bits: Option<u8>,

    /// Stop bits [default: 1]
    #[arg(long = "stop")]
    stop_bits: Option<u8>,

    /// Disable newline conversion
    #[arg(long)]
    raw: bool,

    /// Line ending sent for Enter: cr, lf or crlf [default: crlf]
    #[arg(long)]
    eol: Option<LineEnding>,

    /// TOML file with connection defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// List available serial ports and exit
    #[arg(short, long)]
    list: bool,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            device: self.device.clone(),
            baud_rate: self.baud,
            data_bits: self.data_bits,
            stop_bits: self.stop_bits,
            eol: self.eol,
            raw: self.raw,
        }
    }
}

fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the device output.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if cli.list {
        return serial::port::print_ports();
    }

    let file_config = match cli.config {
        Some(ref path) => VcomConfig::load(path)?,
        None => VcomConfig::default(),
    };
    let settings = file_config.resolve(&cli.overrides())?;

    connect(settings)
}

fn connect(settings: Settings) -> Result<()> {
    let device = serial::open_device(&settings.port)?;

    info!(
        "Connected to {} at {}bps",
        settings.port.port_path, settings.port.baud_rate
    );
    if settings.session.raw {
        debug!("Newline conversion disabled");
    } else {
        debug!("Sending {} for each newline", settings.session.eol);
    }

    let end = run_session(
        io::stdin(),
        io::stdout(),
        device.reader,
        device.writer,
        settings.session,
    )?;
    debug!(
        "{} relay finished first ({})",
        end.direction,
        if end.termination.is_clean() { "closed" } else { "failed" }
    );

    Ok(())
}
