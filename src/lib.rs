//! A library for QIPU "intelligent grating" light curtains on a Modbus RTU bus.
//!
//! A grating is a row of light beams. The library reports which beams are
//! blocked and reconfigures the grating's serial settings, mapping each
//! operation onto one read or write of the grating's holding registers.
//!
//! The crate is layered like this:
//!
//! 1.  **[`protocol`]**: the register map and strongly typed values
//!     (`Address`, `BaudRate`, `Parity`, `BeamCount`, `BeamStatus`) with
//!     their register encodings. Independent of any transport.
//! 2.  **[`client`]**: the [`client::ModbusClient`] capability the driver
//!     talks through, and [`client::RtuClient`], its `tokio-modbus`
//!     implementation on a serial port.
//! 3.  **[`tokio_async`]**: [`tokio_async::IntelligentGrating`], the driver
//!     owning a client and the grating's unit address.
//! 4.  **[`tokio_async_safe_client`]**: a cloneable client serializing
//!     concurrent callers onto the single bus.
//!
//! ## Quick Start
//!
//! ```no_run
//! use grating_lib::{
//!     protocol::{Address, BeamCount, Parity},
//!     tokio_async::IntelligentGrating,
//!     tokio_common::SerialConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SerialConfig {
//!         address: Address::try_from(0x41)?,
//!         parity: Parity::None,
//!         ..SerialConfig::new("/dev/ttyUSB1")
//!     };
//!     let mut grating = IntelligentGrating::build(&config).await?;
//!
//!     let lowest = grating.read_lowest_blocked().await?;
//!     let highest = grating.read_highest_blocked().await?;
//!     println!("Blocked beams from {lowest:?} to {highest:?}");
//!
//!     if let Some(status) = grating.read_all_light_status(BeamCount::default()).await? {
//!         println!("Blocked: {:?}", status.blocked_beams().collect::<Vec<_>>());
//!     }
//!
//!     grating.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! * `tokio-rtu` (default): serial port configuration and [`client::RtuClient`].
//! * `safe-client-async` (default): [`tokio_async_safe_client::SafeClient`].
//! * `serde` (default): serde support for the protocol types and YAML loading
//!   of [`tokio_common::SerialConfig`].

pub mod client;
pub mod protocol;
pub mod tokio_async;
pub mod tokio_common;

#[cfg_attr(docsrs, doc(cfg(feature = "safe-client-async")))]
#[cfg(feature = "safe-client-async")]
pub mod tokio_async_safe_client;
