use thiserror::Error;

/// Wire-level transfer failures reported by a [`crate::bus::TwiController`].
#[derive(Error, Debug)]
pub enum TransferError {
    /// The addressed device did not acknowledge. `phase` names the transfer
    /// that failed: "address", "data", or "read".
    #[error("no ACK from device {device:#04x} during {phase} phase")]
    Nack { device: u8, phase: &'static str },

    /// Controller-side failure (peripheral disabled, kernel I/O error, ...).
    #[error("controller error: {0}")]
    Controller(String),
}

/// Errors surfaced by the bus and the sensor drivers.
#[derive(Error, Debug)]
pub enum HubError {
    #[error("bus transfer failed: {0}")]
    Bus(#[from] TransferError),

    /// The bus lock was not acquired within the configured bound.
    #[error("bus lock not acquired within {timeout_ms}ms")]
    Lock { timeout_ms: u64 },

    /// The device ACKed but reported an unexpected identity register value.
    #[error("sensor '{sensor}' identity mismatch: expected {expected:#04x}, got {actual:#04x}")]
    WrongChipId {
        sensor: String,
        expected: u8,
        actual: u8,
    },

    /// A caller-supplied value does not fit the target register.
    #[error("parameter '{param}' out of range: {value} exceeds {max}")]
    BadParameter {
        param: &'static str,
        value: u32,
        max: u32,
    },

    #[error("hardware initialization failed: {reason}")]
    HardwareInit { reason: String },

    #[error("unsupported sensor driver: '{driver}'")]
    UnsupportedDriver { driver: String },

    #[error("bus '{bus}' not found in bus configuration")]
    BusNotFound { bus: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load config from '{path}': {source}")]
    LoadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Startup errors from bringing up buses and registering sensor drivers.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("sensor registration failed: {0}")]
    RegistrationError(HubError),

    #[error("bus initialization failed: {0}")]
    BusInitError(ConfigError),

    #[error("driver creation failed: {0}")]
    DriverCreationError(HubError),
}

pub type HubResult<T> = Result<T, HubError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
pub type RegistryResult<T> = Result<T, RegistryError>;
