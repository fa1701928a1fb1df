//! Connection settings
//!
//! Settings come from three places, highest precedence first: command-line
//! flags, an optional TOML file, and built-in defaults.
//!
//! ```toml
//! [port]
//! device = "/dev/ttyUSB0"
//! baud_rate = 115200
//! data_bits = 8
//! stop_bits = 1
//!
//! [terminal]
//! eol = "crlf"
//! raw = false
//! ```

use crate::relay::{LineEnding, SessionConfig};
use crate::serial::port::{PortConfig, DEFAULT_BAUD, DEFAULT_DEVICE};
use serde::Deserialize;
use serialport::{DataBits, StopBits};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("unsupported data bits: {0} (expected 5-8)")]
    DataBits(u8),

    #[error("unsupported stop bits: {0} (expected 1 or 2)")]
    StopBits(u8),
}

/// `[port]` table
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PortSettings {
    pub device: Option<String>,
    pub baud_rate: Option<u32>,
    pub data_bits: Option<u8>,
    pub stop_bits: Option<u8>,
}

/// `[terminal]` table
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TerminalSettings {
    pub eol: Option<LineEnding>,
    pub raw: Option<bool>,
}

/// Contents of a config file
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VcomConfig {
    pub port: PortSettings,
    pub terminal: TerminalSettings,
}

/// Values given on the command line; `None` defers to the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub device: Option<String>,
    pub baud_rate: Option<u32>,
    pub data_bits: Option<u8>,
    pub stop_bits: Option<u8>,
    pub eol: Option<LineEnding>,
    pub raw: bool,
}

/// Fully resolved settings for one connection
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub port: PortConfig,
    pub session: SessionConfig,
}

impl VcomConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Merge command-line overrides over this file and the defaults
    pub fn resolve(&self, overrides: &Overrides) -> Result<Settings, ConfigError> {
        let device = overrides
            .device
            .clone()
            .or_else(|| self.port.device.clone())
            .unwrap_or_else(|| DEFAULT_DEVICE.to_string());
        let baud_rate = overrides
            .baud_rate
            .or(self.port.baud_rate)
            .unwrap_or(DEFAULT_BAUD);
        let data_bits = data_bits(overrides.data_bits.or(self.port.data_bits).unwrap_or(8))?;
        let stop_bits = stop_bits(overrides.stop_bits.or(self.port.stop_bits).unwrap_or(1))?;

        let port = PortConfig::new(&device)
            .with_baud_rate(baud_rate)
            .with_data_bits(data_bits)
            .with_stop_bits(stop_bits);

        let session = SessionConfig {
            eol: overrides.eol.or(self.terminal.eol).unwrap_or_default(),
            raw: overrides.raw || self.terminal.raw.unwrap_or(false),
        };

        Ok(Settings { port, session })
    }
}

fn data_bits(bits: u8) -> Result<DataBits, ConfigError> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        other => Err(ConfigError::DataBits(other)),
    }
}

fn stop_bits(bits: u8) -> Result<StopBits, ConfigError> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        other => Err(ConfigError::StopBits(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_match_classic_terminal() {
        let settings = VcomConfig::default()
            .resolve(&Overrides::default())
            .unwrap();

        assert_eq!(settings.port.port_path, "/dev/ttyS0");
        assert_eq!(settings.port.baud_rate, 19200);
        assert_eq!(settings.port.data_bits, DataBits::Eight);
        assert_eq!(settings.port.stop_bits, StopBits::One);
        assert_eq!(settings.session.eol, LineEnding::CrLf);
        assert!(!settings.session.raw);
    }

    #[test]
    fn test_parse_full_file() {
        let content = r#"
[port]
device = "/dev/ttyUSB1"
baud_rate = 115200
data_bits = 7
stop_bits = 2

[terminal]
eol = "cr"
raw = true
"#;
        let config = VcomConfig::parse(content).unwrap();
        assert_eq!(config.port.device.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(config.terminal.eol, Some(LineEnding::Cr));

        let settings = config.resolve(&Overrides::default()).unwrap();
        assert_eq!(settings.port.baud_rate, 115200);
        assert_eq!(settings.port.data_bits, DataBits::Seven);
        assert_eq!(settings.port.stop_bits, StopBits::Two);
        assert!(settings.session.raw);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = VcomConfig::parse("[terminal]\neol = \"lf\"\n").unwrap();
        let settings = config.resolve(&Overrides::default()).unwrap();
        assert_eq!(settings.port.port_path, "/dev/ttyS0");
        assert_eq!(settings.session.eol, LineEnding::Lf);
    }

    #[test]
    fn test_overrides_win_over_file() {
        let config = VcomConfig::parse("[port]\ndevice = \"/dev/ttyUSB1\"\nbaud_rate = 9600\n").unwrap();
        let overrides = Overrides {
            baud_rate: Some(57600),
            eol: Some(LineEnding::Cr),
            raw: true,
            ..Default::default()
        };

        let settings = config.resolve(&overrides).unwrap();
        assert_eq!(settings.port.port_path, "/dev/ttyUSB1");
        assert_eq!(settings.port.baud_rate, 57600);
        assert_eq!(settings.session.eol, LineEnding::Cr);
        assert!(settings.session.raw);
    }

    #[test]
    fn test_rejects_unknown_eol() {
        let err = VcomConfig::parse("[terminal]\neol = \"nl\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_rejects_unknown_keys() {
        assert!(VcomConfig::parse("[port]\nparity = \"odd\"\n").is_err());
    }

    #[test]
    fn test_rejects_bad_line_settings() {
        let overrides = Overrides {
            data_bits: Some(9),
            ..Default::default()
        };
        let err = VcomConfig::default().resolve(&overrides).unwrap_err();
        assert!(matches!(err, ConfigError::DataBits(9)));

        let overrides = Overrides {
            stop_bits: Some(3),
            ..Default::default()
        };
        let err = VcomConfig::default().resolve(&overrides).unwrap_err();
        assert!(matches!(err, ConfigError::StopBits(3)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[port]\nbaud_rate = 38400").unwrap();

        let config = VcomConfig::load(file.path()).unwrap();
        assert_eq!(config.port.baud_rate, Some(38400));
    }

    #[test]
    fn test_load_missing_file() {
        let err = VcomConfig::load(Path::new("/nonexistent/vcom.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/vcom.toml"));
    }
}
