pub mod client;
#[cfg(target_os = "linux")]
pub mod i2c;
pub mod sim;

pub use client::{RegisterClient, AUTO_INCREMENT};

use crate::errors::{HubError, HubResult, TransferError};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::error;

/// Whether a TX transfer closes the frame or leaves the bus open for the
/// next transfer (repeated start).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stop {
    Stop,
    NoStop,
}

/// Low-level two-wire controller. Implementations cover the Linux i2cdev
/// backend and the in-memory simulator; all of them are driven exclusively
/// through [`TwiBus`], which provides the serialization guarantee.
pub trait TwiController: Send {
    /// Configures the physical controller once, before any transfer.
    fn bring_up(&mut self, scl_pin: u32, sda_pin: u32) -> Result<(), TransferError>;

    /// Toggles the peripheral power state.
    fn set_enabled(&mut self, enabled: bool) -> Result<(), TransferError>;

    /// Transmits `bytes` to `device`, with or without a closing stop condition.
    fn tx(&mut self, device: u8, bytes: &[u8], stop: Stop) -> Result<(), TransferError>;

    /// Receives `buf.len()` bytes from `device`, closing the frame.
    fn rx(&mut self, device: u8, buf: &mut [u8]) -> Result<(), TransferError>;
}

// Two-phase register framing shared by the per-call methods and the
// transaction guard. Phase (a) sends the register address with the bus held
// open; phase (b) moves the payload and closes the frame.

fn framed_write(
    ctrl: &mut dyn TwiController,
    device: u8,
    register: u8,
    data: &[u8],
) -> Result<(), TransferError> {
    ctrl.tx(device, &[register], Stop::NoStop)?;
    ctrl.tx(device, data, Stop::Stop)
}

fn framed_read(
    ctrl: &mut dyn TwiController,
    device: u8,
    register: u8,
    buf: &mut [u8],
) -> Result<(), TransferError> {
    ctrl.tx(device, &[register], Stop::NoStop)?;
    ctrl.rx(device, buf)
}

/// The single shared bus resource. Every register transaction against any
/// device on the wire goes through one of these methods, each of which holds
/// the internal lock for the full duration of both transfer phases.
pub struct TwiBus {
    controller: Mutex<Box<dyn TwiController>>,
    lock_timeout: Option<Duration>,
}

impl std::fmt::Debug for TwiBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwiBus")
            .field("lock_timeout", &self.lock_timeout)
            .finish_non_exhaustive()
    }
}

impl TwiBus {
    /// Brings the controller up on the given pins and wraps it in the bus
    /// lock. Called once at startup per physical bus.
    pub fn init(
        mut controller: Box<dyn TwiController>,
        scl_pin: u32,
        sda_pin: u32,
    ) -> HubResult<Self> {
        controller.bring_up(scl_pin, sda_pin).map_err(|e| {
            error!(
                "[bus] controller bring-up failed (SCL {}, SDA {}): {}",
                scl_pin, sda_pin, e
            );
            HubError::HardwareInit {
                reason: e.to_string(),
            }
        })?;
        Ok(Self {
            controller: Mutex::new(controller),
            lock_timeout: None,
        })
    }

    /// Bounds the wait for the bus lock. The default is to wait forever,
    /// matching the underlying cooperative-blocking model.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    async fn acquire(&self) -> HubResult<MutexGuard<'_, Box<dyn TwiController>>> {
        match self.lock_timeout {
            None => Ok(self.controller.lock().await),
            Some(timeout) => tokio::time::timeout(timeout, self.controller.lock())
                .await
                .map_err(|_| {
                    let timeout_ms = timeout.as_millis() as u64;
                    error!("[bus] lock not acquired within {}ms", timeout_ms);
                    HubError::Lock { timeout_ms }
                }),
        }
    }

    /// Enables the peripheral. The bus must have been initialized beforehand
    /// via [`TwiBus::init`].
    pub async fn enable(&self) -> HubResult<()> {
        let mut ctrl = self.acquire().await?;
        ctrl.set_enabled(true).map_err(|e| {
            error!("[bus] enable failed: {}", e);
            HubError::from(e)
        })
    }

    /// Disables the peripheral.
    pub async fn disable(&self) -> HubResult<()> {
        let mut ctrl = self.acquire().await?;
        ctrl.set_enabled(false).map_err(|e| {
            error!("[bus] disable failed: {}", e);
            HubError::from(e)
        })
    }

    /// Writes `data` to a register of a device on the wire. Two-phase: the
    /// device and register address go out with the bus held open, then the
    /// payload closes the frame. The lock is released on every exit path,
    /// including a phase-(a) NACK.
    pub async fn write(&self, device: u8, register: u8, data: &[u8]) -> HubResult<()> {
        let mut ctrl = self.acquire().await?;
        framed_write(ctrl.as_mut(), device, register, data).map_err(|e| {
            error!(
                "[bus] write to {:#04x} reg {:#04x} failed: {}",
                device, register, e
            );
            HubError::from(e)
        })
    }

    /// Reads `buf.len()` bytes from a register of a device on the wire.
    /// Same framing and lock contract as [`TwiBus::write`].
    pub async fn read(&self, device: u8, register: u8, buf: &mut [u8]) -> HubResult<()> {
        let mut ctrl = self.acquire().await?;
        framed_read(ctrl.as_mut(), device, register, buf).map_err(|e| {
            error!(
                "[bus] read from {:#04x} reg {:#04x} failed: {}",
                device, register, e
            );
            HubError::from(e)
        })
    }

    /// Single-phase read with no register framing, used for presence/ACK
    /// probing and device scanning.
    pub async fn read_raw(&self, device: u8, buf: &mut [u8]) -> HubResult<()> {
        let mut ctrl = self.acquire().await?;
        ctrl.rx(device, buf).map_err(|e| {
            error!("[bus] raw read from {:#04x} failed: {}", device, e);
            HubError::from(e)
        })
    }

    /// Sends address, register, and one data byte as a single contiguous
    /// frame, for devices that require the write in one physical transfer.
    pub async fn write_packed(&self, device: u8, register: u8, value: u8) -> HubResult<()> {
        let mut ctrl = self.acquire().await?;
        ctrl.tx(device, &[register, value], Stop::Stop).map_err(|e| {
            error!(
                "[bus] packed write to {:#04x} reg {:#04x} failed: {}",
                device, register, e
            );
            HubError::from(e)
        })
    }

    /// Acquires the lock once and returns a guard exposing the same
    /// primitives. Multi-step sequences that must be atomic against other
    /// bus users (e.g. bypass-bridge open followed by secondary-device
    /// traffic) run entirely inside one of these.
    pub async fn transaction(&self) -> HubResult<BusTransaction<'_>> {
        Ok(BusTransaction {
            controller: self.acquire().await?,
        })
    }
}

/// Exclusive critical section on the bus. Holds the lock until dropped; no
/// other caller can touch the wire in between.
pub struct BusTransaction<'a> {
    controller: MutexGuard<'a, Box<dyn TwiController>>,
}

impl BusTransaction<'_> {
    pub fn write(&mut self, device: u8, register: u8, data: &[u8]) -> HubResult<()> {
        framed_write(self.controller.as_mut(), device, register, data).map_err(|e| {
            error!(
                "[bus] write to {:#04x} reg {:#04x} failed: {}",
                device, register, e
            );
            HubError::from(e)
        })
    }

    pub fn read(&mut self, device: u8, register: u8, buf: &mut [u8]) -> HubResult<()> {
        framed_read(self.controller.as_mut(), device, register, buf).map_err(|e| {
            error!(
                "[bus] read from {:#04x} reg {:#04x} failed: {}",
                device, register, e
            );
            HubError::from(e)
        })
    }

    pub fn read_raw(&mut self, device: u8, buf: &mut [u8]) -> HubResult<()> {
        self.controller.rx(device, buf).map_err(|e| {
            error!("[bus] raw read from {:#04x} failed: {}", device, e);
            HubError::from(e)
        })
    }

    pub fn write_packed(&mut self, device: u8, register: u8, value: u8) -> HubResult<()> {
        self.controller
            .tx(device, &[register, value], Stop::Stop)
            .map_err(|e| {
                error!(
                    "[bus] packed write to {:#04x} reg {:#04x} failed: {}",
                    device, register, e
                );
                HubError::from(e)
            })
    }
}
