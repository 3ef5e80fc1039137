//! Channel configuration, loadable from TOML
//!
//! ```toml
//! type = "socketcan"
//! interface_name = "can0"
//! bit_rate = 250000
//! force_bounce = false
//! ```
//!
//! ```toml
//! type = "usbcan"
//! port_name = "/dev/ttyUSB0"
//! serial_baud_rate = 2000000
//! bit_rate = 250000
//! ```
use std::path::Path;

use serde::Deserialize;
use snafu::{ResultExt, Snafu};

use crate::bitrate::DEFAULT_BIT_RATE;

/// Default baud rate of the serial link to a USB-CAN adapter
pub const DEFAULT_SERIAL_BAUD_RATE: u32 = 2_000_000;

fn default_bit_rate() -> u32 {
    DEFAULT_BIT_RATE
}

fn default_serial_baud_rate() -> u32 {
    DEFAULT_SERIAL_BAUD_RATE
}

/// Error returned when loading a channel configuration fails
#[derive(Debug, Snafu)]
pub enum ConfigError {
    /// The file could not be read
    #[snafu(display("IO error loading {path}: {source:?}"))]
    Io {
        /// Path of the configuration file
        path: String,
        /// The underlying IO error
        source: std::io::Error,
    },
    /// The file is not a valid channel configuration
    #[snafu(display("Error parsing TOML: {source}"))]
    TomlDeserialization {
        /// The toml error which led to this error
        source: toml::de::Error,
    },
}

/// Settings for a channel on a kernel CAN interface
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct KernelChannelOptions {
    /// Interface name, e.g. "can0"
    pub interface_name: String,
    /// Desired bus bit rate
    #[serde(default = "default_bit_rate")]
    pub bit_rate: u32,
    /// Bring the interface down and back up even if it is already running at `bit_rate`
    #[serde(default)]
    pub force_bounce: bool,
}

impl KernelChannelOptions {
    /// Options for the named interface at the default bit rate
    pub fn new(interface_name: impl Into<String>) -> Self {
        Self {
            interface_name: interface_name.into(),
            bit_rate: DEFAULT_BIT_RATE,
            force_bounce: false,
        }
    }
}

/// Settings for a channel on a USB-CAN serial adapter
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct SerialChannelOptions {
    /// Path of the serial device, e.g. "/dev/ttyUSB0"
    pub port_name: String,
    /// Baud rate of the serial link to the adapter
    #[serde(default = "default_serial_baud_rate")]
    pub serial_baud_rate: u32,
    /// Desired bus bit rate
    #[serde(default = "default_bit_rate")]
    pub bit_rate: u32,
}

impl SerialChannelOptions {
    /// Options for the given serial device with default serial and bus rates
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            serial_baud_rate: DEFAULT_SERIAL_BAUD_RATE,
            bit_rate: DEFAULT_BIT_RATE,
        }
    }
}

/// Configuration for either kind of channel
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChannelConfig {
    /// A kernel CAN interface
    Socketcan(KernelChannelOptions),
    /// A USB-CAN serial adapter
    Usbcan(SerialChannelOptions),
}

impl ChannelConfig {
    /// Read a configuration from a file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<ChannelConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).context(IoSnafu {
            path: path.to_string_lossy(),
        })?;
        Self::load_from_str(&content)
    }

    /// Read a configuration from a string
    pub fn load_from_str(s: &str) -> Result<ChannelConfig, ConfigError> {
        toml::from_str(s).context(TomlDeserializationSnafu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assertables::assert_contains;

    #[test]
    fn test_load_socketcan() {
        const TOML: &str = r#"
            type = "socketcan"
            interface_name = "can1"
            force_bounce = true
        "#;
        let config = ChannelConfig::load_from_str(TOML).unwrap();
        assert_eq!(
            ChannelConfig::Socketcan(KernelChannelOptions {
                interface_name: "can1".into(),
                bit_rate: 250_000,
                force_bounce: true,
            }),
            config
        );
    }

    #[test]
    fn test_load_usbcan() {
        const TOML: &str = r#"
            type = "usbcan"
            port_name = "/dev/ttyUSB0"
            bit_rate = 500000
        "#;
        let config = ChannelConfig::load_from_str(TOML).unwrap();
        assert_eq!(
            ChannelConfig::Usbcan(SerialChannelOptions {
                port_name: "/dev/ttyUSB0".into(),
                serial_baud_rate: 2_000_000,
                bit_rate: 500_000,
            }),
            config
        );
    }

    #[test]
    fn test_unknown_type_fails() {
        const TOML: &str = r#"
            type = "pcan"
            port_name = "/dev/ttyUSB0"
        "#;
        let err = ChannelConfig::load_from_str(TOML).unwrap_err();
        assert!(matches!(err, ConfigError::TomlDeserialization { .. }));
        assert_contains!(err.to_string().as_str(), "Error parsing TOML");
    }

    #[test]
    fn test_missing_file() {
        let err = ChannelConfig::load_from_file("/nonexistent/channel.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert_contains!(err.to_string().as_str(), "/nonexistent/channel.toml");
        assert_contains!(err.to_string().as_str(), "kind: NotFound");
    }
}
