//! Shareable asynchronous client for the QIPU intelligent grating.
//!
//! An RTU bus is half duplex, so only one transaction may be in flight at a
//! time. [`SafeClient`] puts an [`IntelligentGrating`] behind an
//! `Arc<tokio::sync::Mutex<_>>`; clones share the grating and their requests
//! are executed one after the other.

use crate::{
    client::ModbusClient, protocol as proto, tokio_async::IntelligentGrating,
    tokio_common::Result,
};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Cloneable, serialized access to one grating.
#[derive(Debug)]
pub struct SafeClient<C> {
    grating: Arc<Mutex<IntelligentGrating<C>>>,
}

impl<C> Clone for SafeClient<C> {
    fn clone(&self) -> Self {
        Self {
            grating: self.grating.clone(),
        }
    }
}

#[cfg(feature = "tokio-rtu")]
impl SafeClient<crate::client::RtuClient> {
    /// Opens the serial port described by `config` and returns a connected client.
    pub async fn build(config: &crate::tokio_common::SerialConfig) -> Result<Self> {
        Ok(Self::new(IntelligentGrating::build(config).await?))
    }
}

impl<C: ModbusClient> SafeClient<C> {
    /// Creates a new `SafeClient` owning `grating`.
    pub fn new(grating: IntelligentGrating<C>) -> Self {
        Self {
            grating: Arc::new(Mutex::new(grating)),
        }
    }

    /// Creates a new `SafeClient` from a shared grating.
    pub fn from_shared(grating: Arc<Mutex<IntelligentGrating<C>>>) -> Self {
        Self { grating }
    }

    /// Clones the shared grating.
    pub fn clone_shared(&self) -> Arc<Mutex<IntelligentGrating<C>>> {
        self.grating.clone()
    }

    pub async fn address(&self) -> proto::Address {
        self.grating.lock().await.address()
    }

    pub async fn connect(&self) -> Result<()> {
        self.grating.lock().await.connect().await
    }

    pub async fn close(&self) -> Result<()> {
        self.grating.lock().await.close().await
    }

    pub async fn is_connected(&self) -> bool {
        self.grating.lock().await.is_connected()
    }

    /// Reads the index of the lowest blocked beam.
    pub async fn read_lowest_blocked(&self) -> Result<Option<u16>> {
        self.grating.lock().await.read_lowest_blocked().await
    }

    /// Reads the index of the highest blocked beam.
    pub async fn read_highest_blocked(&self) -> Result<Option<u16>> {
        self.grating.lock().await.read_highest_blocked().await
    }

    /// Reads the number of blocked beams.
    pub async fn read_blocked_quantity(&self) -> Result<Option<u16>> {
        self.grating.lock().await.read_blocked_quantity().await
    }

    /// Reads the blocked/clear state of the first `count` beams.
    pub async fn read_all_light_status(
        &self,
        count: proto::BeamCount,
    ) -> Result<Option<proto::BeamStatus>> {
        self.grating.lock().await.read_all_light_status(count).await
    }

    /// Reads the state of the 80 beams of a standard grating.
    pub async fn read_all_light_status_default(&self) -> Result<Option<proto::BeamStatus>> {
        self.grating.lock().await.read_all_light_status_default().await
    }

    /// Assigns a new unit address to the grating.
    pub async fn set_address(&self, new_address: proto::Address) -> Result<()> {
        self.grating.lock().await.set_address(new_address).await
    }

    /// Sets the serial bit rate of the grating.
    pub async fn set_baud_rate(&self, baud_rate: proto::BaudRate) -> Result<()> {
        self.grating.lock().await.set_baud_rate(baud_rate).await
    }

    /// Sets the serial parity of the grating.
    pub async fn set_parity(&self, parity: proto::Parity) -> Result<()> {
        self.grating.lock().await.set_parity(parity).await
    }

    /// Broadcasts the factory reset to every grating on the bus.
    pub async fn reset_defaults(&self) -> Result<()> {
        self.grating.lock().await.reset_defaults().await
    }
}
