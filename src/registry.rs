use crate::bus::sim::SimController;
#[cfg(target_os = "linux")]
use crate::bus::i2c::LinuxController;
use crate::bus::{TwiBus, TwiController};
use crate::config::bus_config::BusEntry;
use crate::config::load_bus_config;
use crate::config::sensor_config::SensorConfig;
use crate::errors::{ConfigError, HubError, RegistryError, RegistryResult};
use crate::sensors::{create_sensor_driver, SensorDriver};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

fn build_controller(
    entry: &BusEntry,
    sensor_config: &SensorConfig,
) -> RegistryResult<Box<dyn TwiController>> {
    match entry.r#type.as_str() {
        "sim" => {
            let (controller, handle) = SimController::new();
            // Seed the simulated wire so the configured sensors answer.
            for s in sensor_config.sensors.iter().filter(|s| s.bus == entry.id) {
                match s.driver.as_str() {
                    #[cfg(feature = "lis2dh12")]
                    "lis2dh12" => crate::sensors::lis2dh12::seed_sim(&handle, s.address),
                    #[cfg(feature = "mpu9250")]
                    "mpu9250" => crate::sensors::mpu9250::seed_sim(&handle, s.address),
                    _ => {}
                }
            }
            Ok(Box::new(controller))
        }
        #[cfg(target_os = "linux")]
        "i2c" => {
            let path = entry.path.as_deref().ok_or_else(|| {
                RegistryError::BusInitError(ConfigError::InvalidValue {
                    field: "path".to_string(),
                    reason: "required for type = \"i2c\"".to_string(),
                })
            })?;
            Ok(Box::new(LinuxController::new(path)))
        }
        other => Err(RegistryError::BusInitError(ConfigError::InvalidValue {
            field: "type".to_string(),
            reason: format!("unsupported bus type '{}' on this platform", other),
        })),
    }
}

pub async fn init_all(
    sensor_config: &SensorConfig,
) -> RegistryResult<Vec<Box<dyn SensorDriver + Send>>> {
    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config".to_string());
    let bus_config_path = format!("{}/buses.toml", config_path);
    let bus_cfg = load_bus_config(&bus_config_path).map_err(|e| {
        RegistryError::BusInitError(ConfigError::LoadError {
            path: bus_config_path,
            source: e,
        })
    })?;

    let mut bus_map: HashMap<String, Arc<TwiBus>> = HashMap::new();
    for b in bus_cfg.buses.iter() {
        let controller = build_controller(b, sensor_config)?;
        let mut bus = TwiBus::init(controller, b.scl_pin, b.sda_pin)
            .map_err(RegistryError::RegistrationError)?;
        if let Some(ms) = b.lock_timeout_ms {
            bus = bus.with_lock_timeout(Duration::from_millis(ms));
        }
        bus.enable().await.map_err(RegistryError::RegistrationError)?;
        info!(
            "[registry] bus '{}' up (type={}, SCL {}, SDA {})",
            b.id, b.r#type, b.scl_pin, b.sda_pin
        );
        bus_map.insert(b.id.clone(), Arc::new(bus));
    }

    let mut sensors: Vec<Box<dyn SensorDriver + Send>> = Vec::new();
    info!(
        "[registry] initializing {} sensors...",
        sensor_config.sensors.len()
    );
    for s in sensor_config.sensors.iter() {
        let bus = bus_map.get(&s.bus).ok_or_else(|| {
            RegistryError::DriverCreationError(HubError::BusNotFound { bus: s.bus.clone() })
        })?;
        let mut sensor =
            create_sensor_driver(s, bus.clone()).map_err(RegistryError::DriverCreationError)?;
        info!(
            "[registry] registering sensor: id={} driver={} bus={}",
            s.id, s.driver, s.bus
        );

        // Presence scan before configuration; a missing device shows up
        // here as a NACK instead of halfway through an init sequence.
        let mut probe = [0u8; 1];
        if let Err(e) = bus.read_raw(s.address, &mut probe).await {
            warn!(
                "[registry] no ACK from {:#04x} for '{}': {}",
                s.address, s.id, e
            );
        }

        // A failing device is skipped; the remaining sensors still come up.
        if let Err(e) = sensor.init().await {
            error!("[registry] init failed for '{}', skipping: {}", s.id, e);
            continue;
        }
        sensors.push(sensor);
    }

    Ok(sensors)
}
