//! MPU-9250 accelerometer/gyro driver, with the on-package AK89xx
//! magnetometer reached through the I2C bypass bridge.

use super::{SampleTriple, SensorDataFrame, SensorDriver, SensorFactory};
use crate::bus::{BusTransaction, RegisterClient, TwiBus};
use crate::config::sensor_config::SensorEntry;
use crate::errors::{HubError, HubResult};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Fixed bus address (AD0 low).
pub const MPU_I2C_ADDR: u8 = 0x68;
/// Fixed bus address of the AK89xx magnetometer behind the bypass bridge.
pub const AK89XX_MAGN_ADDR: u8 = 0x0C;

// Register addresses
pub const REG_SMPLRT_DIV: u8 = 0x19;
pub const REG_CONFIG: u8 = 0x1A;
pub const REG_GYRO_CONFIG: u8 = 0x1B;
pub const REG_ACCEL_CONFIG: u8 = 0x1C;
pub const REG_FF_THR: u8 = 0x1D;
pub const REG_FF_DUR: u8 = 0x1E;
pub const REG_INT_PIN_CFG: u8 = 0x37;
pub const REG_INT_ENABLE: u8 = 0x38;
pub const REG_INT_STATUS: u8 = 0x3A;
pub const REG_ACCEL_XOUT_H: u8 = 0x3B;
pub const REG_TEMP_OUT_H: u8 = 0x41;
pub const REG_GYRO_XOUT_H: u8 = 0x43;
pub const REG_SIGNAL_PATH_RESET: u8 = 0x68;
pub const REG_PWR_MGMT_1: u8 = 0x6B;

// AK89xx magnetometer sub-map, reachable only through the bridge
pub const AK89XX_REG_ST1: u8 = 0x02;
pub const AK89XX_REG_HXL: u8 = 0x03;
pub const AK89XX_REG_ST2: u8 = 0x09;
pub const AK89XX_REG_CNTL: u8 = 0x0A;

// Configuration byte encodings
const SIGNAL_PATH_RESET_ALL: u8 = 0x07; // gyro + accel + temp paths
const PWR_MGMT_1_CLKSEL_PLL_X_GYRO: u8 = 0x01;
const AK89XX_CNTL_CONTINUOUS_2_16BIT: u8 = 0x16;

/// Free-fall threshold register scale.
pub const MG_PER_LSB_FF_THR: f32 = 15.625;

/// Sample-rate and filter configuration, written as one four-byte block
/// starting at SMPLRT_DIV. Field-to-byte mapping is explicit; the wire
/// layout never comes from struct memory.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MpuConfig {
    pub smplrt_div: u8,
    pub config: u8,
    pub gyro_config: u8,
    pub accel_config: u8,
}

impl MpuConfig {
    pub fn to_bytes(&self) -> [u8; 4] {
        [
            self.smplrt_div,
            self.config,
            self.gyro_config,
            self.accel_config,
        ]
    }
}

/// INT_PIN_CFG bit fields (bit 0 is reserved).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IntPinConfig {
    pub actl: bool,
    pub open: bool,
    pub latch_int_en: bool,
    pub int_anyrd_clear: bool,
    pub actl_fsync: bool,
    pub fsync_int_mode_en: bool,
    pub bypass_en: bool,
}

impl IntPinConfig {
    pub fn from_byte(byte: u8) -> Self {
        Self {
            actl: byte & 0x80 != 0,
            open: byte & 0x40 != 0,
            latch_int_en: byte & 0x20 != 0,
            int_anyrd_clear: byte & 0x10 != 0,
            actl_fsync: byte & 0x08 != 0,
            fsync_int_mode_en: byte & 0x04 != 0,
            bypass_en: byte & 0x02 != 0,
        }
    }

    pub fn to_byte(&self) -> u8 {
        (self.actl as u8) << 7
            | (self.open as u8) << 6
            | (self.latch_int_en as u8) << 5
            | (self.int_anyrd_clear as u8) << 4
            | (self.actl_fsync as u8) << 3
            | (self.fsync_int_mode_en as u8) << 2
            | (self.bypass_en as u8) << 1
    }
}

pub struct Mpu9250 {
    id: String,
    client: RegisterClient,
    magn_address: u8,
    fall_detection: Option<(u16, u8)>,
}

impl Mpu9250 {
    pub fn new(id: String, bus: Arc<TwiBus>, address: u8) -> Self {
        Self {
            id,
            client: RegisterClient::new(bus, address),
            magn_address: AK89XX_MAGN_ADDR,
            fall_detection: None,
        }
    }

    /// Configures free-fall detection during `init`.
    pub fn with_fall_detection(mut self, threshold_mg: u16, duration: u8) -> Self {
        self.fall_detection = Some((threshold_mg, duration));
        self
    }

    /// Resets the gyro, accelerometer and temperature signal paths.
    pub async fn reset_signal_paths(&self) -> HubResult<()> {
        self.client
            .write_register(REG_SIGNAL_PATH_RESET, SIGNAL_PATH_RESET_ALL)
            .await
    }

    /// Selects the PLL with X-axis gyroscope reference as clock source.
    pub async fn select_clock_source(&self) -> HubResult<()> {
        self.client
            .write_register(REG_PWR_MGMT_1, PWR_MGMT_1_CLKSEL_PLL_X_GYRO)
            .await
    }

    /// Writes the sample-rate/filter block starting at SMPLRT_DIV. The
    /// device advances its register pointer across the four bytes.
    pub async fn apply_config(&self, config: &MpuConfig) -> HubResult<()> {
        self.client
            .write_registers(REG_SMPLRT_DIV, &config.to_bytes())
            .await
    }

    pub async fn enable_interrupts(&self, mask: u8) -> HubResult<()> {
        self.client.write_register(REG_INT_ENABLE, mask).await
    }

    pub async fn read_interrupt_source(&self) -> HubResult<u8> {
        self.client.read_register(REG_INT_STATUS).await
    }

    pub async fn read_accel(&self) -> HubResult<SampleTriple> {
        let mut raw = [0u8; 6];
        self.client
            .read_registers(REG_ACCEL_XOUT_H, &mut raw)
            .await?;
        Ok(SampleTriple::from_be_reversed(&raw))
    }

    pub async fn read_gyro(&self) -> HubResult<SampleTriple> {
        let mut raw = [0u8; 6];
        self.client
            .read_registers(REG_GYRO_XOUT_H, &mut raw)
            .await?;
        Ok(SampleTriple::from_be_reversed(&raw))
    }

    /// Raw device counts, big-endian.
    pub async fn read_temperature(&self) -> HubResult<i16> {
        let mut raw = [0u8; 2];
        self.client.read_registers(REG_TEMP_OUT_H, &mut raw).await?;
        Ok(i16::from_be_bytes([raw[0], raw[1]]))
    }

    /// Converts a milli-g threshold to register counts and programs the
    /// free-fall threshold and duration. A threshold that does not fit the
    /// 8-bit register is rejected before anything reaches the bus.
    pub async fn configure_fall_detection(&self, threshold_mg: u16, duration: u8) -> HubResult<()> {
        let counts = (threshold_mg as f32 / MG_PER_LSB_FF_THR) as u32;
        if counts > u8::MAX as u32 {
            return Err(HubError::BadParameter {
                param: "ff_threshold_mg",
                value: counts,
                max: u8::MAX as u32,
            });
        }
        self.client.write_register(REG_FF_THR, counts as u8).await?;
        self.client.write_register(REG_FF_DUR, duration).await
    }

    /// Opens the bypass path to the magnetometer and returns a bridge that
    /// keeps the bus locked until dropped. Bridge-open plus all secondary
    /// traffic is therefore one critical section; a concurrent caller
    /// cannot toggle the bypass bit underneath an open bridge.
    pub async fn open_secondary_bridge(&self) -> HubResult<MagnetometerBridge<'_>> {
        let mut txn = self.client.bus().transaction().await?;
        let mut cfg = [0u8; 1];
        txn.read(self.client.address(), REG_INT_PIN_CFG, &mut cfg)?;
        let mut pin_cfg = IntPinConfig::from_byte(cfg[0]);
        pin_cfg.bypass_en = true;
        txn.write_packed(self.client.address(), REG_INT_PIN_CFG, pin_cfg.to_byte())?;
        Ok(MagnetometerBridge {
            txn,
            address: self.magn_address,
        })
    }

    /// Puts the magnetometer into continuous measurement mode 2, 16-bit
    /// output, through a freshly opened bridge.
    pub async fn init_magnetometer(&self) -> HubResult<()> {
        let mut bridge = self.open_secondary_bridge().await?;
        bridge.write(AK89XX_REG_CNTL, AK89XX_CNTL_CONTINUOUS_2_16BIT)?;
        info!("[{}] magnetometer configured via bypass bridge", self.id);
        Ok(())
    }

    /// One-shot magnetometer read: opens the bridge, takes a measurement,
    /// and optionally returns the ST2 status byte.
    pub async fn read_magnetometer(
        &self,
        want_status: bool,
    ) -> HubResult<(SampleTriple, Option<u8>)> {
        let mut bridge = self.open_secondary_bridge().await?;
        let mut raw = [0u8; 6];
        let status = bridge.read_measurement(&mut raw, want_status)?;
        Ok((SampleTriple::from_le_pairs(&raw), status))
    }
}

/// Pass-through path to the magnetometer. Holds the bus transaction guard,
/// so nothing else can run on the wire while the bridge is open.
pub struct MagnetometerBridge<'a> {
    txn: BusTransaction<'a>,
    address: u8,
}

impl MagnetometerBridge<'_> {
    pub fn read(&mut self, register: u8, buf: &mut [u8]) -> HubResult<()> {
        self.txn.read(self.address, register, buf)
    }

    pub fn write(&mut self, register: u8, value: u8) -> HubResult<()> {
        self.txn.write_packed(self.address, register, value)
    }

    /// Reads the six measurement registers starting at HXL, then ST2. The
    /// ST2 read ends the measurement latch and is issued even when the
    /// caller has no use for the status value.
    pub fn read_measurement(
        &mut self,
        buf: &mut [u8; 6],
        want_status: bool,
    ) -> HubResult<Option<u8>> {
        self.txn.read(self.address, AK89XX_REG_HXL, buf)?;
        let mut st2 = [0u8; 1];
        self.txn.read(self.address, AK89XX_REG_ST2, &mut st2)?;
        Ok(if want_status { Some(st2[0]) } else { None })
    }
}

#[async_trait]
impl SensorDriver for Mpu9250 {
    async fn init(&mut self) -> HubResult<()> {
        self.reset_signal_paths().await?;
        self.select_clock_source().await?;
        self.apply_config(&MpuConfig::default()).await?;
        if let Some((threshold_mg, duration)) = self.fall_detection {
            self.configure_fall_detection(threshold_mg, duration)
                .await?;
        }
        self.init_magnetometer().await
    }

    async fn read(&mut self) -> HubResult<SensorDataFrame> {
        let mut frame = SensorDataFrame::default();
        frame.accel = Some(self.read_accel().await?);
        frame.gyro = Some(self.read_gyro().await?);
        frame.temp_raw = Some(self.read_temperature().await?);
        let (mag, _) = self.read_magnetometer(false).await?;
        frame.mag = Some(mag);
        Ok(frame)
    }

    fn id(&self) -> &str {
        &self.id
    }
}

/// Seeds a simulated bus with the IMU and its bridged magnetometer.
pub fn seed_sim(handle: &crate::bus::sim::SimHandle, address: u8) {
    use crate::bus::sim::Increment;
    handle.add_device(address, Increment::Always);
    handle.add_gated_device(
        AK89XX_MAGN_ADDR,
        Increment::Always,
        address,
        REG_INT_PIN_CFG,
        0x02,
    );
}

pub static MPU9250_FACTORY: Mpu9250Factory = Mpu9250Factory;

pub struct Mpu9250Factory;

impl SensorFactory for Mpu9250Factory {
    fn name(&self) -> &'static str {
        "mpu9250"
    }

    fn create(&self, entry: &SensorEntry, bus: Arc<TwiBus>) -> Box<dyn SensorDriver + Send> {
        let mut driver = Mpu9250::new(entry.id.clone(), bus, entry.address);
        if let (Some(threshold_mg), Some(duration)) = (entry.ff_threshold_mg, entry.ff_duration) {
            driver = driver.with_fall_detection(threshold_mg, duration);
        }
        Box::new(driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::sim::{Increment, SimController, SimHandle, WireOp};

    const BYPASS_MASK: u8 = 0x02;

    async fn sim_imu() -> (Mpu9250, SimHandle) {
        let (ctrl, handle) = SimController::new();
        handle.add_device(MPU_I2C_ADDR, Increment::Always);
        handle.add_gated_device(
            AK89XX_MAGN_ADDR,
            Increment::Always,
            MPU_I2C_ADDR,
            REG_INT_PIN_CFG,
            BYPASS_MASK,
        );
        let bus = TwiBus::init(Box::new(ctrl), 8, 7).unwrap();
        bus.enable().await.unwrap();
        handle.clear_ops();
        (
            Mpu9250::new("imu_main".to_string(), Arc::new(bus), MPU_I2C_ADDR),
            handle,
        )
    }

    #[tokio::test]
    async fn init_resets_paths_and_selects_clock() {
        let (mut imu, handle) = sim_imu().await;
        imu.init().await.unwrap();

        assert_eq!(
            handle.register(MPU_I2C_ADDR, REG_SIGNAL_PATH_RESET),
            Some(0x07)
        );
        assert_eq!(handle.register(MPU_I2C_ADDR, REG_PWR_MGMT_1), Some(0x01));
        // Magnetometer got its mode through the bridge.
        assert_eq!(
            handle.register(AK89XX_MAGN_ADDR, AK89XX_REG_CNTL),
            Some(0x16)
        );
    }

    #[tokio::test]
    async fn config_block_lands_in_consecutive_registers() {
        let (imu, handle) = sim_imu().await;
        let config = MpuConfig {
            smplrt_div: 0x04,
            config: 0x03,
            gyro_config: 0x08,
            accel_config: 0x10,
        };
        imu.apply_config(&config).await.unwrap();

        assert_eq!(handle.register(MPU_I2C_ADDR, REG_SMPLRT_DIV), Some(0x04));
        assert_eq!(handle.register(MPU_I2C_ADDR, REG_CONFIG), Some(0x03));
        assert_eq!(handle.register(MPU_I2C_ADDR, REG_GYRO_CONFIG), Some(0x08));
        assert_eq!(handle.register(MPU_I2C_ADDR, REG_ACCEL_CONFIG), Some(0x10));
    }

    #[tokio::test]
    async fn axis_read_decodes_back_to_front_big_endian() {
        let (imu, handle) = sim_imu().await;
        let raw = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06];
        for (i, byte) in raw.iter().enumerate() {
            handle.set_register(MPU_I2C_ADDR, REG_ACCEL_XOUT_H + i as u8, *byte);
        }

        let sample = imu.read_accel().await.unwrap();
        assert_eq!(sample.x, 0x0605);
        assert_eq!(sample.y, 0x0403);
        assert_eq!(sample.z, 0x0201);
    }

    #[tokio::test]
    async fn temperature_is_big_endian() {
        let (imu, handle) = sim_imu().await;
        handle.set_register(MPU_I2C_ADDR, REG_TEMP_OUT_H, 0x12);
        handle.set_register(MPU_I2C_ADDR, REG_TEMP_OUT_H + 1, 0x34);

        assert_eq!(imu.read_temperature().await.unwrap(), 0x1234);
    }

    #[tokio::test]
    async fn oversized_fall_threshold_never_reaches_the_bus() {
        let (imu, handle) = sim_imu().await;

        // 4000 mg / 15.625 mg per LSB = 256, one past the register range.
        let err = imu.configure_fall_detection(4000, 5).await.unwrap_err();
        assert!(matches!(
            err,
            HubError::BadParameter {
                param: "ff_threshold_mg",
                value: 256,
                max: 255,
            }
        ));
        assert!(handle.ops().is_empty());
    }

    #[tokio::test]
    async fn fall_detection_writes_threshold_and_duration() {
        let (imu, handle) = sim_imu().await;
        imu.configure_fall_detection(1000, 5).await.unwrap();

        assert_eq!(handle.register(MPU_I2C_ADDR, REG_FF_THR), Some(64));
        assert_eq!(handle.register(MPU_I2C_ADDR, REG_FF_DUR), Some(5));
    }

    #[tokio::test]
    async fn bridge_open_preserves_other_pin_config_bits() {
        let (imu, handle) = sim_imu().await;
        handle.set_register(MPU_I2C_ADDR, REG_INT_PIN_CFG, 0x20);

        let bridge = imu.open_secondary_bridge().await.unwrap();
        drop(bridge);

        assert_eq!(
            handle.register(MPU_I2C_ADDR, REG_INT_PIN_CFG),
            Some(0x20 | BYPASS_MASK)
        );
    }

    #[tokio::test]
    async fn magnetometer_read_always_issues_the_st2_latch_release() {
        let (imu, handle) = sim_imu().await;
        let raw = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66];
        for (i, byte) in raw.iter().enumerate() {
            handle.set_register(AK89XX_MAGN_ADDR, AK89XX_REG_HXL + i as u8, *byte);
        }
        handle.set_register(AK89XX_MAGN_ADDR, AK89XX_REG_ST2, 0x10);

        // Status not requested: the ST2 read still goes on the wire.
        let (sample, status) = imu.read_magnetometer(false).await.unwrap();
        assert_eq!(status, None);
        assert_eq!(sample.x, 0x2211);
        let st2_selects = handle
            .ops()
            .iter()
            .filter(|op| {
                matches!(
                    op,
                    WireOp::Tx {
                        device: AK89XX_MAGN_ADDR,
                        bytes,
                        no_stop: true,
                    } if bytes == &vec![AK89XX_REG_ST2]
                )
            })
            .count();
        assert_eq!(st2_selects, 1);

        // Status requested: same wire traffic, value surfaced.
        let (_, status) = imu.read_magnetometer(true).await.unwrap();
        assert_eq!(status, Some(0x10));
    }

    #[tokio::test]
    async fn magnetometer_nacks_while_bypass_is_closed() {
        let (imu, handle) = sim_imu().await;
        handle.set_register(MPU_I2C_ADDR, REG_INT_PIN_CFG, 0x00);

        // Direct secondary access without the bridge: the gate is closed.
        let mut buf = [0u8; 1];
        let err = imu
            .client
            .bus()
            .read(AK89XX_MAGN_ADDR, AK89XX_REG_ST1, &mut buf)
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::Bus(_)));
    }

    #[test]
    fn int_pin_config_round_trips() {
        for byte in [0x00u8, 0x02, 0x20, 0xA2, 0xFE] {
            assert_eq!(IntPinConfig::from_byte(byte).to_byte(), byte & 0xFE);
        }
        let mut cfg = IntPinConfig::default();
        cfg.bypass_en = true;
        assert_eq!(cfg.to_byte(), 0x02);
    }
}
