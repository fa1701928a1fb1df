//! Serial port configuration and connection management
//!
//! Opens the device once and hands the relay one handle per direction.

use anyhow::{Context, Result};
use colored::Colorize;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::time::Duration;

/// Device used when none is configured
pub const DEFAULT_DEVICE: &str = "/dev/ttyS0";

/// Baud rate used when none is configured
pub const DEFAULT_BAUD: u32 = 19200;

/// How long a device read waits before reporting an idle timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// Configuration for serial port connection
#[derive(Debug, Clone, PartialEq)]
pub struct PortConfig {
    /// Serial port path (e.g., /dev/ttyS0, /dev/ttyUSB0)
    pub port_path: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
    /// Read/write timeout; idle timeouts are retried by the relay
    pub timeout: Duration,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            port_path: String::from(DEFAULT_DEVICE),
            baud_rate: DEFAULT_BAUD,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl PortConfig {
    pub fn new(port_path: &str) -> Self {
        Self {
            port_path: port_path.to_string(),
            ..Default::default()
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_data_bits(mut self, data_bits: DataBits) -> Self {
        self.data_bits = data_bits;
        self
    }

    pub fn with_stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }
}

/// Two handles on one opened port, one per relay direction
pub struct DeviceHandles {
    pub reader: Box<dyn SerialPort>,
    pub writer: Box<dyn SerialPort>,
}

/// Open the configured port
pub fn open_device(config: &PortConfig) -> Result<DeviceHandles> {
    let reader = serialport::new(&config.port_path, config.baud_rate)
        .data_bits(config.data_bits)
        .parity(config.parity)
        .stop_bits(config.stop_bits)
        .flow_control(config.flow_control)
        .timeout(config.timeout)
        .open()
        .with_context(|| format!("Failed to open serial port: {}", config.port_path))?;

    let writer = reader
        .try_clone()
        .with_context(|| format!("Failed to clone serial port handle: {}", config.port_path))?;

    Ok(DeviceHandles { reader, writer })
}

/// Information about a detected serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    pub path: String,
    pub port_type: PortType,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PortType {
    UsbSerial,
    PciSerial,
    Bluetooth,
    Unknown,
}

impl std::fmt::Display for PortType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortType::UsbSerial => write!(f, "USB Serial"),
            PortType::PciSerial => write!(f, "PCI Serial"),
            PortType::Bluetooth => write!(f, "Bluetooth"),
            PortType::Unknown => write!(f, "Unknown"),
        }
    }
}

impl From<serialport::SerialPortInfo> for PortInfo {
    fn from(p: serialport::SerialPortInfo) -> Self {
        let mut info = PortInfo {
            path: p.port_name,
            port_type: PortType::Unknown,
            manufacturer: None,
            product: None,
            serial_number: None,
            vid: None,
            pid: None,
        };

        match p.port_type {
            serialport::SerialPortType::UsbPort(usb) => {
                info.port_type = PortType::UsbSerial;
                info.manufacturer = usb.manufacturer;
                info.product = usb.product;
                info.serial_number = usb.serial_number;
                info.vid = Some(usb.vid);
                info.pid = Some(usb.pid);
            }
            serialport::SerialPortType::PciPort => info.port_type = PortType::PciSerial,
            serialport::SerialPortType::BluetoothPort => info.port_type = PortType::Bluetooth,
            serialport::SerialPortType::Unknown => {}
        }

        info
    }
}

/// List all available serial ports
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports().with_context(|| "Failed to enumerate serial ports")?;
    Ok(ports.into_iter().map(PortInfo::from).collect())
}

/// Print formatted list of available serial ports
pub fn print_ports() -> Result<()> {
    let ports = list_ports()?;

    if ports.is_empty() {
        println!("{}", "No serial ports found".yellow());
        println!("\n{}", "Troubleshooting tips:".cyan().bold());
        println!("  1. Check if the device is recognized: ls -la /dev/ttyS* /dev/ttyUSB* /dev/ttyACM*");
        println!("  2. Add your user to the 'dialout' group: sudo usermod -aG dialout $USER");
        return Ok(());
    }

    println!("{}", "Available Serial Ports:".green().bold());
    println!("{}", "=".repeat(60));

    for port in ports {
        println!("\n{}: {}", "Port".cyan(), port.path.white().bold());
        println!("  Type: {}", port.port_type);

        if let Some(ref mfg) = port.manufacturer {
            println!("  Manufacturer: {}", mfg);
        }
        if let Some(ref prod) = port.product {
            println!("  Product: {}", prod);
        }
        if let Some(ref sn) = port.serial_number {
            println!("  Serial: {}", sn);
        }
        if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            println!("  VID:PID: {:04x}:{:04x}", vid, pid);
        }
    }

    println!("\n{}", "=".repeat(60));
    println!("{}", "Use: vcom -d <PORT> -b <BAUD> to connect".yellow());

    Ok(())
}
