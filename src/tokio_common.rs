//! Common error type and serial configuration for the `tokio` based clients.
use crate::protocol as proto;

/// Represents all possible errors that can occur during Modbus communication.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Wraps `proto::Error`.
    #[error(transparent)]
    ProtocolError(#[from] proto::Error),

    /// Wraps `tokio_modbus::ExceptionCode`.
    #[error(transparent)]
    TokioExceptionError(#[from] tokio_modbus::ExceptionCode),

    /// Wraps `tokio_modbus::Error`.
    #[error(transparent)]
    TokioError(#[from] tokio_modbus::Error),

    /// The serial port could not be opened.
    #[error("Cannot open serial port: {0}")]
    SerialError(#[source] std::io::Error),

    /// A transaction was attempted without an open connection.
    #[error("Not connected")]
    NotConnected,
}

impl Error {
    /// `true` if the error is a transport timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::TokioError(tokio_modbus::Error::Transport(err))
                if err.kind() == std::io::ErrorKind::TimedOut
        )
    }
}

/// The result type for tokio operations.
pub type Result<T> = std::result::Result<T, crate::tokio_common::Error>;

#[cfg(feature = "tokio-rtu")]
pub use serial::*;

#[cfg(feature = "tokio-rtu")]
mod serial {
    use crate::protocol as proto;
    use std::time::Duration;

    /// The number of stop bits used for serial communication.
    pub const STOP_BITS: &tokio_serial::StopBits = &tokio_serial::StopBits::One;
    /// The number of data bits used for serial communication.
    pub const DATA_BITS: &tokio_serial::DataBits = &tokio_serial::DataBits::Eight;
    /// Default response timeout of a single transaction.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

    fn default_device_name() -> String {
        if cfg!(target_os = "windows") {
            String::from("COM1")
        } else {
            String::from("/dev/ttyUSB0")
        }
    }

    /// Connection settings of a grating on a serial bus.
    ///
    /// With the `serde` feature the settings can be loaded from YAML:
    ///
    /// ```yaml
    /// device: /dev/ttyUSB1
    /// address: 65
    /// baud_rate: 115200
    /// parity: none
    /// timeout: 500ms
    /// ```
    ///
    /// Omitted fields keep their defaults.
    #[derive(Debug, Clone, PartialEq)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    #[cfg_attr(feature = "serde", serde(default))]
    pub struct SerialConfig {
        /// Serial port device, e.g. `/dev/ttyUSB0` or `COM3`.
        pub device: String,
        pub address: proto::Address,
        pub baud_rate: proto::BaudRate,
        pub parity: proto::Parity,
        /// Response deadline of every transaction.
        #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
        pub timeout: Duration,
    }

    impl Default for SerialConfig {
        fn default() -> Self {
            Self {
                device: default_device_name(),
                address: proto::Address::default(),
                baud_rate: proto::BaudRate::default(),
                parity: proto::Parity::default(),
                timeout: DEFAULT_TIMEOUT,
            }
        }
    }

    impl SerialConfig {
        /// Settings for `device` with all other values at their defaults.
        pub fn new(device: impl Into<String>) -> Self {
            Self {
                device: device.into(),
                ..Default::default()
            }
        }

        /// Parses the settings from a YAML document.
        #[cfg(feature = "serde")]
        pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
            serde_yaml::from_str(yaml)
        }

        /// Reads the settings from a YAML file.
        #[cfg(feature = "serde")]
        pub fn load(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
            let file = std::fs::File::open(path)?;
            serde_yaml::from_reader(file)
                .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
        }
    }

    impl From<proto::Parity> for tokio_serial::Parity {
        fn from(parity: proto::Parity) -> Self {
            match parity {
                proto::Parity::None => tokio_serial::Parity::None,
                proto::Parity::Odd => tokio_serial::Parity::Odd,
                proto::Parity::Even => tokio_serial::Parity::Even,
            }
        }
    }

    /// Creates a `tokio_serial::SerialPortBuilder` with the specified settings.
    pub fn serial_port_builder(config: &SerialConfig) -> tokio_serial::SerialPortBuilder {
        tokio_serial::new(config.device.as_str(), *config.baud_rate)
            .parity(config.parity.into())
            .stop_bits(*STOP_BITS)
            .data_bits(*DATA_BITS)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(config.timeout)
    }

}
