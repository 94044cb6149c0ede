use crate::config::sensor_config::SensorConfig;
use crate::sensors::SensorDriver;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info};

/// Spawns one polling task per sensor at its configured frequency. Each
/// read serializes against every other bus user through the bus lock.
pub async fn spawn_sensor_tasks(
    sensors: Vec<Box<dyn SensorDriver + Send>>,
    sensor_config: &SensorConfig,
) {
    for mut sensor in sensors.into_iter() {
        let sensor_id = sensor.id().to_string();

        let frequency = sensor_config
            .sensors
            .iter()
            .find(|s| s.id == sensor_id)
            .and_then(|s| s.frequency)
            .unwrap_or(100); // Default to 100Hz if not specified
        let sleep_duration = Duration::from_millis((1000.0 / frequency as f32) as u64);

        tokio::spawn(async move {
            info!("[{}] starting sensor task at {}Hz", sensor_id, frequency);

            loop {
                match sensor.read().await {
                    Ok(frame) => {
                        debug!("[{}] frame: {:?}", sensor_id, frame);
                    }
                    Err(e) => {
                        error!("[{}] sensor read error: {}", sensor_id, e);
                    }
                }

                sleep(sleep_duration).await;
            }
        });
    }
}
