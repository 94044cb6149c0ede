use super::TwiBus;
use crate::errors::HubResult;
use std::sync::Arc;

/// High bit OR'd into a register address to request address auto-increment
/// during a multi-byte transfer (LIS2DH12 convention; the MPU-9250 family
/// auto-increments without it).
pub const AUTO_INCREMENT: u8 = 0x80;

/// Binds a fixed 7-bit device address to the shared bus. No state beyond
/// the bound address; cheap to construct per device.
#[derive(Clone)]
pub struct RegisterClient {
    bus: Arc<TwiBus>,
    address: u8,
}

impl RegisterClient {
    pub fn new(bus: Arc<TwiBus>, address: u8) -> Self {
        Self { bus, address }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn bus(&self) -> &Arc<TwiBus> {
        &self.bus
    }

    pub async fn read_register(&self, register: u8) -> HubResult<u8> {
        let mut buf = [0u8; 1];
        self.bus.read(self.address, register, &mut buf).await?;
        Ok(buf[0])
    }

    pub async fn write_register(&self, register: u8, value: u8) -> HubResult<()> {
        self.bus.write(self.address, register, &[value]).await
    }

    /// Writes a contiguous register block starting at `register`, for
    /// devices that advance the register pointer on their own.
    pub async fn write_registers(&self, register: u8, data: &[u8]) -> HubResult<()> {
        self.bus.write(self.address, register, data).await
    }

    /// Multi-byte read with the register address untouched, for devices
    /// that advance the register pointer on their own.
    pub async fn read_registers(&self, register: u8, buf: &mut [u8]) -> HubResult<()> {
        self.bus.read(self.address, register, buf).await
    }

    /// Multi-byte read with the auto-increment flag OR'd into `base`.
    pub async fn burst_read(&self, base: u8, count: usize) -> HubResult<Vec<u8>> {
        let mut buf = vec![0u8; count];
        self.bus
            .read(self.address, base | AUTO_INCREMENT, &mut buf)
            .await?;
        Ok(buf)
    }

    /// Presence probe: a raw one-byte read, succeeding iff the device ACKs.
    pub async fn probe(&self) -> HubResult<()> {
        let mut buf = [0u8; 1];
        self.bus.read_raw(self.address, &mut buf).await
    }
}
