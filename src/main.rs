use imu_sensorhub::config::load_sensor_config;
use imu_sensorhub::registry::init_all;
use imu_sensorhub::scheduler::spawn_sensor_tasks;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // RUST_LOG=debug for per-frame output, RUST_LOG=info for normal operation
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    info!("[ImuSensorHub] starting up...");

    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config".to_string());
    let sensor_config_path = format!("{}/sensors.toml", config_path);
    let sensor_config = load_sensor_config(&sensor_config_path).expect("Failed to load sensor config");
    info!("[config] loaded {} sensor(s)", sensor_config.sensors.len());

    let sensors = init_all(&sensor_config).await.expect("Initialization failed");
    info!("[registry] sensors and buses initialized");

    spawn_sensor_tasks(sensors, &sensor_config).await;
    info!("[main] sensor tasks launched");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("[main] failed to listen for shutdown signal: {}", e);
    }
    info!("[main] shutting down");
}
