//! Asynchronous driver for the QIPU intelligent grating.
//!
//! [`IntelligentGrating`] owns a [`ModbusClient`] and the unit address of one
//! grating. Every method issues exactly one Modbus transaction and converts
//! between the raw registers and the types of [`crate::protocol`].
//!
//! Reads answer `Ok(None)` when the device responds with a Modbus exception
//! and fail with an error when the transaction itself fails. Writes fail with
//! an error in both cases.
//!
//! # Example
//!
//! ```no_run
//! use grating_lib::{protocol::BeamCount, tokio_async::IntelligentGrating, tokio_common::SerialConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut grating = IntelligentGrating::build(&SerialConfig::new("/dev/ttyUSB1")).await?;
//!
//!     if let Some(quantity) = grating.read_blocked_quantity().await? {
//!         println!("Blocked beams: {quantity}");
//!     }
//!     if let Some(status) = grating.read_all_light_status(BeamCount::default()).await? {
//!         println!("Beam status: {status}");
//!     }
//!
//!     grating.close().await?;
//!     Ok(())
//! }
//! ```

use crate::{client::ModbusClient, protocol as proto, tokio_common::Result};
use log::*;

/// One grating on a Modbus bus.
#[derive(Debug)]
pub struct IntelligentGrating<C> {
    client: C,
    address: proto::Address,
}

#[cfg(feature = "tokio-rtu")]
impl IntelligentGrating<crate::client::RtuClient> {
    /// Opens the serial port described by `config` and returns a connected
    /// grating addressed at `config.address`.
    ///
    /// # Errors
    ///
    /// * `Error::SerialError` if the serial port cannot be opened.
    pub async fn build(config: &crate::tokio_common::SerialConfig) -> Result<Self> {
        let mut grating = Self::new(crate::client::RtuClient::new(config), config.address);
        grating.connect().await?;
        Ok(grating)
    }

    /// Like [`Self::build`], with the settings given one by one.
    pub async fn build_port(
        port: &str,
        address: proto::Address,
        baud_rate: proto::BaudRate,
        parity: proto::Parity,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        Self::build(&crate::tokio_common::SerialConfig {
            device: port.to_string(),
            address,
            baud_rate,
            parity,
            timeout,
        })
        .await
    }
}

impl<C: ModbusClient> IntelligentGrating<C> {
    /// Wraps a client without connecting it.
    pub fn new(client: C, address: proto::Address) -> Self {
        Self { client, address }
    }

    /// The unit address every request except the factory reset is sent to.
    pub fn address(&self) -> proto::Address {
        self.address
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    pub fn into_client(self) -> C {
        self.client
    }

    /// Opens the transport. Connecting a connected grating does nothing.
    pub async fn connect(&mut self) -> Result<()> {
        self.client.connect().await?;
        info!("Connected to grating {}", self.address);
        Ok(())
    }

    /// Releases the transport. Further transactions fail with
    /// `Error::NotConnected` until [`Self::connect`] is called again.
    pub async fn close(&mut self) -> Result<()> {
        self.client.close().await?;
        info!("Closed connection to grating {}", self.address);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// Reads `quantity` holding registers from this grating and decodes them.
    /// A Modbus exception yields `None`.
    async fn read_and_decode<T, F>(
        &mut self,
        address: u16,
        quantity: u16,
        decoder: F,
    ) -> Result<Option<T>>
    where
        F: FnOnce(&[u16]) -> std::result::Result<T, proto::Error>,
    {
        trace!(
            "Read {quantity} holding registers at {address:#06x} from unit {}",
            self.address
        );
        match self
            .client
            .read_holding_registers(self.address, address, quantity)
            .await?
        {
            Ok(words) => Ok(Some(decoder(&words)?)),
            Err(exception) => {
                debug!(
                    "Unit {} answered read at {address:#06x} with exception: {exception}",
                    self.address
                );
                Ok(None)
            }
        }
    }

    /// Writes one register. The request goes to `unit` if given, otherwise to
    /// this grating.
    async fn write_register(
        &mut self,
        address: u16,
        value: u16,
        unit: Option<proto::Address>,
    ) -> Result<()> {
        let unit = unit.unwrap_or(self.address);
        trace!("Write {value:#06x} to register {address:#06x} of unit {unit}");
        Ok(self
            .client
            .write_single_register(unit, address, value)
            .await??)
    }

    /// Reads the index of the lowest blocked beam.
    pub async fn read_lowest_blocked(&mut self) -> Result<Option<u16>> {
        self.read_and_decode(
            proto::LowestBlocked::ADDRESS,
            proto::LowestBlocked::QUANTITY,
            proto::LowestBlocked::decode_from_holding_registers,
        )
        .await
    }

    /// Reads the index of the highest blocked beam.
    pub async fn read_highest_blocked(&mut self) -> Result<Option<u16>> {
        self.read_and_decode(
            proto::HighestBlocked::ADDRESS,
            proto::HighestBlocked::QUANTITY,
            proto::HighestBlocked::decode_from_holding_registers,
        )
        .await
    }

    /// Reads the number of blocked beams.
    pub async fn read_blocked_quantity(&mut self) -> Result<Option<u16>> {
        self.read_and_decode(
            proto::BlockedQuantity::ADDRESS,
            proto::BlockedQuantity::QUANTITY,
            proto::BlockedQuantity::decode_from_holding_registers,
        )
        .await
    }

    /// Reads the blocked/clear state of the first `count` beams.
    ///
    /// The result holds exactly `count` entries, beam 0 first.
    ///
    /// # Errors
    ///
    /// * `Error::ProtocolError` if the device returns a different number of
    ///   registers than requested.
    /// * Transport errors of the underlying client.
    pub async fn read_all_light_status(
        &mut self,
        count: proto::BeamCount,
    ) -> Result<Option<proto::BeamStatus>> {
        self.read_and_decode(
            proto::BeamStatus::ADDRESS,
            count.registers_needed(),
            |words| proto::BeamStatus::decode_from_holding_registers(words, count),
        )
        .await
    }

    /// Reads the state of the 80 beams of a standard grating.
    pub async fn read_all_light_status_default(&mut self) -> Result<Option<proto::BeamStatus>> {
        self.read_all_light_status(proto::BeamCount::default()).await
    }

    /// Assigns a new unit address to the grating.
    ///
    /// This instance keeps sending to the old address. Build a new
    /// instance for the new address once the grating has taken it over.
    pub async fn set_address(&mut self, new_address: proto::Address) -> Result<()> {
        info!("Set address of grating {} to {new_address}", self.address);
        self.write_register(
            proto::Address::ADDRESS,
            new_address.encode_for_write_register(),
            None,
        )
        .await
    }

    /// Sets the serial bit rate of the grating.
    pub async fn set_baud_rate(&mut self, baud_rate: proto::BaudRate) -> Result<()> {
        info!("Set baud rate of grating {} to {baud_rate}", self.address);
        self.write_register(
            proto::BaudRate::ADDRESS,
            baud_rate.encode_for_write_register(),
            None,
        )
        .await
    }

    /// Sets the serial parity of the grating.
    pub async fn set_parity(&mut self, parity: proto::Parity) -> Result<()> {
        info!("Set parity of grating {} to {parity}", self.address);
        self.write_register(
            proto::Parity::ADDRESS,
            parity.encode_for_write_register(),
            None,
        )
        .await
    }

    /// Restores the factory configuration.
    ///
    /// **Warning:** the command is broadcast, every grating on the bus is
    /// reset, not only this one.
    ///
    /// Broadcast requests are never answered, so a timeout while waiting for
    /// the response counts as success. Any other failure is returned.
    pub async fn reset_defaults(&mut self) -> Result<()> {
        warn!("Broadcasting factory reset to all gratings on the bus");
        match self
            .write_register(
                proto::FactoryReset::ADDRESS,
                proto::FactoryReset::encode_for_write_register(),
                Some(proto::FactoryReset::UNIT),
            )
            .await
        {
            Err(err) if err.is_timeout() => {
                debug!("Factory reset returned TimeOut error, broadcasts are not answered");
                Ok(())
            }
            result => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::{MockClient, Request};
    use crate::tokio_common::Error;
    use assert_matches::assert_matches;
    use tokio_modbus::ExceptionCode;

    const UNIT: u8 = 0x41;

    async fn grating(registers: &[(u16, u16)]) -> IntelligentGrating<MockClient> {
        let mut grating = IntelligentGrating::new(
            MockClient::with_registers(registers),
            proto::Address::try_from(UNIT).unwrap(),
        );
        grating.connect().await.unwrap();
        grating
    }

    fn beams(count: u16) -> proto::BeamCount {
        proto::BeamCount::try_from(count).unwrap()
    }

    #[tokio::test]
    async fn read_single_values() {
        let mut grating = grating(&[(0x0040, 3), (0x0041, 12), (0x0042, 10)]).await;
        assert_eq!(grating.read_lowest_blocked().await.unwrap(), Some(3));
        assert_eq!(grating.read_highest_blocked().await.unwrap(), Some(12));
        assert_eq!(grating.read_blocked_quantity().await.unwrap(), Some(10));
        assert_eq!(
            grating.client().requests,
            vec![
                Request::Read { unit: UNIT, address: 0x0040, quantity: 1 },
                Request::Read { unit: UNIT, address: 0x0041, quantity: 1 },
                Request::Read { unit: UNIT, address: 0x0042, quantity: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn read_all_light_status_register_quantity() {
        let registers: Vec<(u16, u16)> = (0..5).map(|register| (register, 0)).collect();
        for (count, quantity) in [(1, 1), (16, 1), (17, 2), (80, 5)] {
            let mut grating = grating(&registers).await;
            let status = grating
                .read_all_light_status(beams(count))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(status.len(), count as usize);
            assert_eq!(
                grating.client().requests,
                vec![Request::Read { unit: UNIT, address: 0x0000, quantity }]
            );
        }
    }

    #[tokio::test]
    async fn read_all_light_status_decodes_swapped_registers() {
        let mut grating = grating(&[(0x0000, 0x0001), (0x0001, 0x0000)]).await;
        let status = grating
            .read_all_light_status(beams(20))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.len(), 20);
        assert_eq!(status.blocked_beams().collect::<Vec<_>>(), vec![8]);
    }

    #[tokio::test]
    async fn read_all_light_status_default_reads_80_beams() {
        let registers = [(0, 0x00FF), (1, 0), (2, 0), (3, 0), (4, 0x0080)];
        let mut grating = grating(&registers).await;
        let status = grating.read_all_light_status_default().await.unwrap().unwrap();
        assert_eq!(status.len(), 80);
        assert_eq!(
            status.blocked_beams().collect::<Vec<_>>(),
            vec![8, 9, 10, 11, 12, 13, 14, 15, 79]
        );
    }

    #[tokio::test]
    async fn exception_yields_none() {
        let mut grating = grating(&[(0x0040, 3)]).await;
        grating.client_mut().exception = Some(ExceptionCode::IllegalDataAddress);
        assert_eq!(grating.read_lowest_blocked().await.unwrap(), None);
        assert_eq!(grating.read_highest_blocked().await.unwrap(), None);
        assert_eq!(grating.read_blocked_quantity().await.unwrap(), None);
        assert_eq!(grating.read_all_light_status(beams(80)).await.unwrap(), None);
        assert_eq!(*grating.address(), UNIT);
        assert!(grating.is_connected());

        grating.client_mut().exception = None;
        assert_eq!(grating.read_lowest_blocked().await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn missing_register_yields_none() {
        let mut grating = grating(&[]).await;
        assert_eq!(grating.read_highest_blocked().await.unwrap(), None);
    }

    #[tokio::test]
    async fn transport_error_propagates() {
        let mut grating = grating(&[(0x0042, 1)]).await;
        grating.client_mut().transport_error = Some(std::io::ErrorKind::TimedOut);
        let err = grating.read_blocked_quantity().await.unwrap_err();
        assert!(err.is_timeout());
        assert_matches!(
            grating.set_parity(proto::Parity::Odd).await,
            Err(Error::TokioError(tokio_modbus::Error::Transport(..)))
        );
    }

    #[tokio::test]
    async fn configuration_writes() {
        let mut grating = grating(&[]).await;
        grating
            .set_address(proto::Address::try_from(0x40).unwrap())
            .await
            .unwrap();
        grating.set_baud_rate(proto::BaudRate::B115200).await.unwrap();
        grating.set_parity(proto::Parity::Even).await.unwrap();
        grating.set_parity(proto::Parity::None).await.unwrap();
        assert_eq!(
            grating.client().requests,
            vec![
                Request::Write { unit: UNIT, address: 0xFFF1, value: 0x40 },
                Request::Write { unit: UNIT, address: 0xFFF2, value: 1152 },
                Request::Write { unit: UNIT, address: 0xFFF3, value: 2 },
                Request::Write { unit: UNIT, address: 0xFFF3, value: 0 },
            ]
        );
        // The instance keeps talking to the old address.
        assert_eq!(*grating.address(), UNIT);
    }

    #[tokio::test]
    async fn reset_defaults_is_broadcast() {
        for unit in [0x0F, UNIT, 247] {
            let mut grating = IntelligentGrating::new(
                MockClient::default(),
                proto::Address::try_from(unit).unwrap(),
            );
            grating.connect().await.unwrap();
            grating.reset_defaults().await.unwrap();
            assert_eq!(
                grating.client().requests,
                vec![Request::Write { unit: 0x00, address: 0xFFF4, value: 0x1111 }]
            );
        }
    }

    #[tokio::test]
    async fn reset_defaults_timeout_is_success() {
        let mut grating = grating(&[]).await;
        grating.client_mut().transport_error = Some(std::io::ErrorKind::TimedOut);
        assert!(grating.reset_defaults().await.is_ok());

        // Only the reset tolerates a missing answer.
        assert!(grating.set_parity(proto::Parity::None).await.unwrap_err().is_timeout());

        grating.client_mut().transport_error = Some(std::io::ErrorKind::BrokenPipe);
        assert_matches!(
            grating.reset_defaults().await,
            Err(Error::TokioError(tokio_modbus::Error::Transport(..)))
        );
    }

    #[cfg(feature = "tokio-rtu")]
    #[tokio::test]
    async fn reset_defaults_over_rtu() {
        use crate::client::RtuClient;
        use crate::tokio_common::SerialConfig;
        use tokio::io::AsyncReadExt;

        let (local, mut peer) = tokio::io::duplex(256);
        let mut client = RtuClient::new(&SerialConfig::new("/dev/null-grating"));
        client.set_timeout(std::time::Duration::from_millis(50));
        client.attach(local);
        let mut grating =
            IntelligentGrating::new(client, proto::Address::try_from(UNIT).unwrap());

        grating.reset_defaults().await.unwrap();
        let mut frame = [0u8; 8];
        peer.read_exact(&mut frame).await.unwrap();
        assert_eq!(frame, [0x00, 0x06, 0xFF, 0xF4, 0x11, 0x11, 0x35, 0xA1]);

        // A unicast write to a silent grating still fails.
        assert!(grating
            .set_parity(proto::Parity::Even)
            .await
            .unwrap_err()
            .is_timeout());
    }

    #[cfg(feature = "tokio-rtu")]
    #[tokio::test]
    async fn build_port_missing_port_fails() {
        assert_matches!(
            IntelligentGrating::build_port(
                "/dev/null-grating",
                proto::Address::default(),
                proto::BaudRate::B115200,
                proto::Parity::None,
                std::time::Duration::from_millis(100),
            )
            .await,
            Err(Error::SerialError(..))
        );
    }

    #[tokio::test]
    async fn write_exception_is_error() {
        let mut grating = grating(&[]).await;
        grating.client_mut().exception = Some(ExceptionCode::IllegalDataValue);
        assert_matches!(
            grating.set_baud_rate(proto::BaudRate::B9600).await,
            Err(Error::TokioExceptionError(ExceptionCode::IllegalDataValue))
        );
    }

    #[tokio::test]
    async fn closed_grating_fails_cleanly() {
        let mut grating = grating(&[(0x0040, 1)]).await;
        grating.close().await.unwrap();
        grating.close().await.unwrap();
        assert!(!grating.is_connected());
        assert_matches!(grating.read_lowest_blocked().await, Err(Error::NotConnected));
        assert_matches!(
            grating.read_all_light_status(beams(80)).await,
            Err(Error::NotConnected)
        );
        assert_matches!(grating.reset_defaults().await, Err(Error::NotConnected));
        assert!(grating.client().requests.is_empty());

        grating.connect().await.unwrap();
        assert_eq!(grating.read_lowest_blocked().await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn short_response_is_error() {
        struct Short(MockClient);

        #[async_trait::async_trait]
        impl ModbusClient for Short {
            async fn connect(&mut self) -> Result<()> {
                self.0.connect().await
            }
            async fn close(&mut self) -> Result<()> {
                self.0.close().await
            }
            fn is_connected(&self) -> bool {
                self.0.is_connected()
            }
            async fn read_holding_registers(
                &mut self,
                _unit: proto::Address,
                _address: u16,
                _quantity: u16,
            ) -> Result<crate::client::Response<Vec<u16>>> {
                Ok(Ok(vec![0]))
            }
            async fn write_single_register(
                &mut self,
                unit: proto::Address,
                address: u16,
                value: u16,
            ) -> Result<crate::client::Response<()>> {
                self.0.write_single_register(unit, address, value).await
            }
        }

        let mut grating =
            IntelligentGrating::new(Short(MockClient::default()), proto::Address::default());
        grating.connect().await.unwrap();
        assert_matches!(
            grating.read_all_light_status(beams(80)).await,
            Err(Error::ProtocolError(proto::Error::UnexpectedRegisterCount {
                expected: 5,
                actual: 1
            }))
        );
    }
}
