#[cfg(feature = "lis2dh12")]
pub mod lis2dh12;
#[cfg(feature = "mpu9250")]
pub mod mpu9250;

use crate::bus::TwiBus;
use crate::config::sensor_config::SensorEntry;
use crate::errors::{HubError, HubResult};
use async_trait::async_trait;
use std::sync::Arc;

/// Three signed 16-bit axis samples reconstructed from six raw bytes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SampleTriple {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

impl SampleTriple {
    /// Low byte first within each pair, pairs in x/y/z register order
    /// (LIS2DH12 output layout).
    pub fn from_le_pairs(raw: &[u8; 6]) -> Self {
        Self {
            x: i16::from_le_bytes([raw[0], raw[1]]),
            y: i16::from_le_bytes([raw[2], raw[3]]),
            z: i16::from_le_bytes([raw[4], raw[5]]),
        }
    }

    /// The raw buffer is copied back-to-front before each pair is combined
    /// big-endian, matching the MPU-9250 readout layout. Reversed relative
    /// to [`SampleTriple::from_le_pairs`] on purpose.
    pub fn from_be_reversed(raw: &[u8; 6]) -> Self {
        let mut flipped = [0u8; 6];
        for (i, byte) in flipped.iter_mut().enumerate() {
            *byte = raw[5 - i];
        }
        Self {
            x: i16::from_be_bytes([flipped[0], flipped[1]]),
            y: i16::from_be_bytes([flipped[2], flipped[3]]),
            z: i16::from_be_bytes([flipped[4], flipped[5]]),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SensorDataFrame {
    pub accel: Option<SampleTriple>,
    pub gyro: Option<SampleTriple>,
    pub mag: Option<SampleTriple>,
    /// Raw device counts; unit conversion is out of scope here.
    pub temp_raw: Option<i16>,
}

#[async_trait]
pub trait SensorDriver: Send + Sync {
    async fn init(&mut self) -> HubResult<()>;
    async fn read(&mut self) -> HubResult<SensorDataFrame>;
    fn id(&self) -> &str;
}

pub trait SensorFactory: Sync {
    fn name(&self) -> &'static str;
    fn create(&self, entry: &SensorEntry, bus: Arc<TwiBus>) -> Box<dyn SensorDriver + Send>;
}

#[cfg(feature = "lis2dh12")]
pub use self::lis2dh12::LIS2DH12_FACTORY;
#[cfg(feature = "mpu9250")]
pub use self::mpu9250::MPU9250_FACTORY;

pub static SENSOR_FACTORIES: &[&dyn SensorFactory] = &[
    #[cfg(feature = "lis2dh12")]
    &LIS2DH12_FACTORY,
    #[cfg(feature = "mpu9250")]
    &MPU9250_FACTORY,
];

pub fn create_sensor_driver(
    entry: &SensorEntry,
    bus: Arc<TwiBus>,
) -> HubResult<Box<dyn SensorDriver + Send>> {
    SENSOR_FACTORIES
        .iter()
        .find(|f| f.name() == entry.driver)
        .map(|f| f.create(entry, bus))
        .ok_or_else(|| HubError::UnsupportedDriver {
            driver: entry.driver.clone(),
        })
}

#[cfg(test)]
mod tests {
    use super::SampleTriple;

    #[test]
    fn le_pairs_decode() {
        let raw = [0x10, 0x00, 0x20, 0x01, 0x30, 0x02];
        let triple = SampleTriple::from_le_pairs(&raw);
        assert_eq!(triple.x, 0x0010);
        assert_eq!(triple.y, 0x0120);
        assert_eq!(triple.z, 0x0230);
    }

    #[test]
    fn be_reversed_decode() {
        let raw = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06];
        let triple = SampleTriple::from_be_reversed(&raw);
        assert_eq!(triple.x, 0x0605);
        assert_eq!(triple.y, 0x0403);
        assert_eq!(triple.z, 0x0201);
    }

    #[test]
    fn be_reversed_keeps_sign() {
        let raw = [0x00, 0x00, 0x00, 0x00, 0xFF, 0x80];
        let triple = SampleTriple::from_be_reversed(&raw);
        assert_eq!(triple.x, i16::from_be_bytes([0x80, 0xFF]));
        assert_eq!(triple.y, 0);
        assert_eq!(triple.z, 0);
    }
}
