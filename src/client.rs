//! Modbus transport abstraction used by the grating driver.
//!
//! [`ModbusClient`] is the small set of capabilities the driver needs from a
//! Modbus master. [`RtuClient`] implements it on top of `tokio-modbus` and
//! `tokio-serial`; tests substitute a simulated client.

use crate::{protocol as proto, tokio_common::Result};
use async_trait::async_trait;

/// Outcome of a transaction that reached the device: either the payload or
/// the Modbus exception the device answered with.
pub type Response<T> = std::result::Result<T, tokio_modbus::ExceptionCode>;

/// Capabilities of a Modbus master connected to one serial bus.
///
/// Every transaction names the unit it is addressed to, so one client can
/// talk to several devices on the same bus. The outer `Result` reports
/// transport failures (including timeouts), the inner [`Response`] reports
/// Modbus exceptions.
#[async_trait]
pub trait ModbusClient: Send {
    /// Opens the transport.
    async fn connect(&mut self) -> Result<()>;

    /// Releases the transport. Closing a closed client does nothing.
    async fn close(&mut self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Read holding registers (function code 0x03).
    async fn read_holding_registers(
        &mut self,
        unit: proto::Address,
        address: u16,
        quantity: u16,
    ) -> Result<Response<Vec<u16>>>;

    /// Write single register (function code 0x06).
    async fn write_single_register(
        &mut self,
        unit: proto::Address,
        address: u16,
        value: u16,
    ) -> Result<Response<()>>;
}

#[cfg(feature = "tokio-rtu")]
pub use rtu::RtuClient;

#[cfg(feature = "tokio-rtu")]
mod rtu {
    use super::{ModbusClient, Response};
    use crate::{
        protocol as proto,
        tokio_common::{serial_port_builder, Error, Result, SerialConfig},
    };
    use async_trait::async_trait;
    use log::*;
    use std::{fmt, time::Duration};
    use tokio::io::{AsyncRead, AsyncWrite};
    use tokio_modbus::{
        client::{Client, Context},
        prelude::{Reader, Writer},
        slave::{Slave, SlaveContext},
    };

    /// Modbus RTU master on a serial port.
    ///
    /// The port is opened by [`ModbusClient::connect`], not on construction.
    /// Every transaction is bounded by the configured timeout.
    pub struct RtuClient {
        builder: tokio_serial::SerialPortBuilder,
        timeout: Duration,
        ctx: Option<Context>,
    }

    impl RtuClient {
        pub fn new(config: &SerialConfig) -> Self {
            Self {
                builder: serial_port_builder(config),
                timeout: config.timeout,
                ctx: None,
            }
        }

        /// Runs the RTU protocol over an already open `transport` instead of
        /// the configured serial port.
        pub fn attach<T>(&mut self, transport: T)
        where
            T: AsyncRead + AsyncWrite + fmt::Debug + Unpin + Send + 'static,
        {
            self.ctx = Some(tokio_modbus::client::rtu::attach(transport));
        }

        pub fn timeout(&self) -> Duration {
            self.timeout
        }

        pub fn set_timeout(&mut self, timeout: Duration) {
            self.timeout = timeout;
        }

        /// The context addressed to `unit`.
        fn context(&mut self, unit: proto::Address) -> Result<&mut Context> {
            let ctx = self.ctx.as_mut().ok_or(Error::NotConnected)?;
            ctx.set_slave(Slave(*unit));
            Ok(ctx)
        }
    }

    impl fmt::Debug for RtuClient {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("RtuClient")
                .field("builder", &self.builder)
                .field("timeout", &self.timeout)
                .field("connected", &self.ctx.is_some())
                .finish()
        }
    }

    fn timed_out(unit: proto::Address, timeout: Duration) -> Error {
        tokio_modbus::Error::Transport(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("no response from unit {unit} within {timeout:?}"),
        ))
        .into()
    }

    #[async_trait]
    impl ModbusClient for RtuClient {
        async fn connect(&mut self) -> Result<()> {
            if self.ctx.is_some() {
                return Ok(());
            }
            let port = tokio_serial::SerialStream::open(&self.builder)
                .map_err(|err| Error::SerialError(err.into()))?;
            info!("Opened serial port {:?}", self.builder);
            self.attach(port);
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            if let Some(mut ctx) = self.ctx.take() {
                ctx.disconnect()
                    .await
                    .map_err(tokio_modbus::Error::Transport)?;
                info!("Closed serial port");
            }
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.ctx.is_some()
        }

        async fn read_holding_registers(
            &mut self,
            unit: proto::Address,
            address: u16,
            quantity: u16,
        ) -> Result<Response<Vec<u16>>> {
            let timeout = self.timeout;
            let ctx = self.context(unit)?;
            match tokio::time::timeout(timeout, ctx.read_holding_registers(address, quantity)).await
            {
                Ok(result) => Ok(result?),
                Err(_) => Err(timed_out(unit, timeout)),
            }
        }

        async fn write_single_register(
            &mut self,
            unit: proto::Address,
            address: u16,
            value: u16,
        ) -> Result<Response<()>> {
            let timeout = self.timeout;
            let ctx = self.context(unit)?;
            match tokio::time::timeout(timeout, ctx.write_single_register(address, value)).await {
                Ok(result) => Ok(result?),
                Err(_) => Err(timed_out(unit, timeout)),
            }
        }
    }

}
