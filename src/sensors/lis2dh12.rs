//! LIS2DH12 3-axis accelerometer driver.

use super::{SampleTriple, SensorDataFrame, SensorDriver, SensorFactory};
use crate::bus::{RegisterClient, TwiBus};
use crate::config::sensor_config::SensorEntry;
use crate::errors::{HubError, HubResult};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Fixed bus address (SA0 low).
pub const LIS2DH12_I2C_ADDR: u8 = 0x18;
/// Expected WHO_AM_I value.
pub const WHO_AM_I_VAL: u8 = 0x33;

// Register addresses
pub const STATUS_REG_AUX: u8 = 0x07;
pub const OUT_TEMP_L: u8 = 0x0C;
pub const OUT_TEMP_H: u8 = 0x0D;
pub const WHO_AM_I: u8 = 0x0F;
pub const CTRL_REG0: u8 = 0x1E;
pub const TEMP_CFG_REG: u8 = 0x1F;
pub const CTRL_REG1: u8 = 0x20;
pub const CTRL_REG2: u8 = 0x21;
pub const CTRL_REG3: u8 = 0x22;
pub const CTRL_REG4: u8 = 0x23;
pub const CTRL_REG5: u8 = 0x24;
pub const CTRL_REG6: u8 = 0x25;
pub const REFERENCE: u8 = 0x26;
pub const STATUS_REG: u8 = 0x27;
pub const OUT_X_L: u8 = 0x28;
pub const OUT_X_H: u8 = 0x29;
pub const OUT_Y_L: u8 = 0x2A;
pub const OUT_Y_H: u8 = 0x2B;
pub const OUT_Z_L: u8 = 0x2C;
pub const OUT_Z_H: u8 = 0x2D;
pub const FIFO_CTRL_REG: u8 = 0x2E;
pub const FIFO_SRC_REG: u8 = 0x2F;
pub const INT1_CFG: u8 = 0x30;
pub const INT1_SRC: u8 = 0x31;
pub const INT1_THS: u8 = 0x32;
pub const INT1_DURATION: u8 = 0x33;
pub const INT2_CFG: u8 = 0x34;
pub const INT2_SRC: u8 = 0x35;
pub const INT2_THS: u8 = 0x36;
pub const INT2_DURATION: u8 = 0x37;
pub const CLICK_CFG: u8 = 0x38;
pub const CLICK_SRC: u8 = 0x39;
pub const CLICK_THS: u8 = 0x3A;
pub const TIME_LIMIT: u8 = 0x3B;
pub const TIME_LATENCY: u8 = 0x3C;
pub const TIME_WINDOW: u8 = 0x3D;
pub const ACT_THS: u8 = 0x3E;
pub const ACT_DUR: u8 = 0x3F;

// Configuration byte encodings
const CTRL_REG1_ODR_100HZ_XYZ_EN: u8 = 0x57;
const CTRL_REG4_FS_2G_LOW_RES: u8 = 0x01;
const FIFO_CTRL_STREAM_MODE: u8 = 0x80;
const CTRL_REG5_FIFO_EN: u8 = 0x40;

/// Configuration ladder the driver walks during bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DriverState {
    Uninitialized,
    IdentityVerified,
    Configured,
    FifoEnabled,
    Streaming,
}

pub struct Lis2dh12 {
    id: String,
    client: RegisterClient,
    state: DriverState,
}

impl Lis2dh12 {
    pub fn new(id: String, bus: Arc<TwiBus>, address: u8) -> Self {
        Self {
            id,
            client: RegisterClient::new(bus, address),
            state: DriverState::Uninitialized,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Reads WHO_AM_I and gates everything else on the expected value. A
    /// mismatch means the device responded but is the wrong (or a misread)
    /// chip; it is reported as such, not as a bus fault.
    pub async fn verify_identity(&mut self) -> HubResult<()> {
        let who_am_i = self.client.read_register(WHO_AM_I).await?;
        if who_am_i != WHO_AM_I_VAL {
            return Err(HubError::WrongChipId {
                sensor: self.id.clone(),
                expected: WHO_AM_I_VAL,
                actual: who_am_i,
            });
        }
        info!("[{}] WHO_AM_I matched: {:#04x}", self.id, who_am_i);
        self.state = DriverState::IdentityVerified;
        Ok(())
    }

    /// ODR 100 Hz with all axes enabled, then ±2 g low-resolution full
    /// scale. The first failing write aborts the sequence; earlier writes
    /// are not rolled back.
    pub async fn configure(&mut self) -> HubResult<()> {
        self.client
            .write_register(CTRL_REG1, CTRL_REG1_ODR_100HZ_XYZ_EN)
            .await?;
        self.client
            .write_register(CTRL_REG4, CTRL_REG4_FS_2G_LOW_RES)
            .await?;
        self.state = DriverState::Configured;
        Ok(())
    }

    /// Stream mode in FIFO_CTRL_REG, then FIFO_EN in CTRL_REG5. Expects
    /// [`Lis2dh12::configure`] to have succeeded first.
    pub async fn enable_fifo(&mut self) -> HubResult<()> {
        self.client
            .write_register(FIFO_CTRL_REG, FIFO_CTRL_STREAM_MODE)
            .await?;
        self.client
            .write_register(CTRL_REG5, CTRL_REG5_FIFO_EN)
            .await?;
        self.state = DriverState::FifoEnabled;
        Ok(())
    }

    /// Burst-reads OUT_X_L..OUT_Z_H with the auto-increment flag and
    /// decodes the little-endian pairs in x, y, z order.
    pub async fn read_sample(&mut self) -> HubResult<SampleTriple> {
        let raw = self.client.burst_read(OUT_X_L, 6).await?;
        let mut bytes = [0u8; 6];
        bytes.copy_from_slice(&raw);
        self.state = DriverState::Streaming;
        Ok(SampleTriple::from_le_pairs(&bytes))
    }
}

#[async_trait]
impl SensorDriver for Lis2dh12 {
    async fn init(&mut self) -> HubResult<()> {
        // An identity mismatch stops here; no configuration write goes out.
        self.verify_identity().await?;
        self.configure().await?;
        self.enable_fifo().await
    }

    async fn read(&mut self) -> HubResult<SensorDataFrame> {
        let mut frame = SensorDataFrame::default();
        frame.accel = Some(self.read_sample().await?);
        Ok(frame)
    }

    fn id(&self) -> &str {
        &self.id
    }
}

/// Seeds a simulated bus with a device that passes identity verification.
pub fn seed_sim(handle: &crate::bus::sim::SimHandle, address: u8) {
    handle.add_device(address, crate::bus::sim::Increment::Flagged);
    handle.set_register(address, WHO_AM_I, WHO_AM_I_VAL);
}

pub static LIS2DH12_FACTORY: Lis2dh12Factory = Lis2dh12Factory;

pub struct Lis2dh12Factory;

impl SensorFactory for Lis2dh12Factory {
    fn name(&self) -> &'static str {
        "lis2dh12"
    }

    fn create(&self, entry: &SensorEntry, bus: Arc<TwiBus>) -> Box<dyn SensorDriver + Send> {
        Box::new(Lis2dh12::new(entry.id.clone(), bus, entry.address))
    }
}
