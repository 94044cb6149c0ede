//! In-memory register-file bus used by the tests and by `type = "sim"` bus
//! entries, standing in for hardware the way the non-Linux fallback does in
//! a development build.

use super::{Stop, TwiController};
use crate::errors::TransferError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// One physical transfer as seen on the simulated wire, in issue order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireOp {
    Tx {
        device: u8,
        bytes: Vec<u8>,
        no_stop: bool,
    },
    Rx {
        device: u8,
        len: usize,
    },
}

/// How a device advances its register pointer during multi-byte access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Increment {
    /// Advances only when the high bit is OR'd into the register address
    /// (LIS2DH12 convention); otherwise the same register repeats.
    Flagged,
    /// Always advances (MPU-9250 / AK89xx convention).
    Always,
}

struct SimDevice {
    registers: [u8; 256],
    increment: Increment,
    /// ACK only while `mask` bits are set in register `reg` of device `gate`.
    /// Models the magnetometer hiding behind the MPU bypass bit.
    gate: Option<(u8, u8, u8)>,
    pointer: u8,
}

impl SimDevice {
    fn new(increment: Increment, gate: Option<(u8, u8, u8)>) -> Self {
        Self {
            registers: [0u8; 256],
            increment,
            gate,
            pointer: 0,
        }
    }

    fn resolve(&self, register: u8) -> (u8, bool) {
        match self.increment {
            Increment::Always => (register, true),
            Increment::Flagged => (register & 0x7F, register & 0x80 != 0),
        }
    }
}

struct SimState {
    devices: HashMap<u8, SimDevice>,
    ops: Vec<WireOp>,
    /// Register selected by a no-stop TX, consumed by the closing transfer.
    pending: Option<(u8, u8)>,
    enabled: bool,
    bring_up_failure: Option<String>,
}

impl SimState {
    fn check_ack(&self, device: u8, phase: &'static str) -> Result<(), TransferError> {
        let dev = self
            .devices
            .get(&device)
            .ok_or(TransferError::Nack { device, phase })?;
        if let Some((gate_device, gate_register, mask)) = dev.gate {
            let open = self
                .devices
                .get(&gate_device)
                .map(|g| g.registers[gate_register as usize] & mask != 0)
                .unwrap_or(false);
            if !open {
                return Err(TransferError::Nack { device, phase });
            }
        }
        Ok(())
    }

    fn store(&mut self, device: u8, register: u8, data: &[u8]) {
        let dev = self.devices.get_mut(&device).expect("ACK checked");
        let (start, advance) = dev.resolve(register);
        let mut at = start;
        for byte in data {
            dev.registers[at as usize] = *byte;
            if advance {
                at = at.wrapping_add(1);
            }
        }
        dev.pointer = at;
    }

    fn load(&mut self, device: u8, register: u8, buf: &mut [u8]) {
        let dev = self.devices.get_mut(&device).expect("ACK checked");
        let (start, advance) = dev.resolve(register);
        let mut at = start;
        for byte in buf.iter_mut() {
            *byte = dev.registers[at as usize];
            if advance {
                at = at.wrapping_add(1);
            }
        }
        dev.pointer = at;
    }

    fn load_raw(&mut self, device: u8, buf: &mut [u8]) {
        let dev = self.devices.get_mut(&device).expect("ACK checked");
        let mut at = dev.pointer;
        for byte in buf.iter_mut() {
            *byte = dev.registers[at as usize];
            at = at.wrapping_add(1);
        }
        dev.pointer = at;
    }

    /// Consumes the pending register selection if it belongs to `device`.
    fn take_pending(&mut self, device: u8) -> Option<u8> {
        match self.pending.take() {
            Some((pending_device, register)) if pending_device == device => Some(register),
            other => {
                self.pending = other;
                None
            }
        }
    }
}

/// Simulated controller handed to [`super::TwiBus::init`].
pub struct SimController {
    state: Arc<Mutex<SimState>>,
}

/// Inspection/seeding handle onto the same simulated wire.
#[derive(Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimController {
    pub fn new() -> (Self, SimHandle) {
        let state = Arc::new(Mutex::new(SimState {
            devices: HashMap::new(),
            ops: Vec::new(),
            pending: None,
            enabled: false,
            bring_up_failure: None,
        }));
        (
            Self {
                state: state.clone(),
            },
            SimHandle { state },
        )
    }
}

impl TwiController for SimController {
    fn bring_up(&mut self, _scl_pin: u32, _sda_pin: u32) -> Result<(), TransferError> {
        let state = self.state.lock().unwrap();
        match &state.bring_up_failure {
            Some(reason) => Err(TransferError::Controller(reason.clone())),
            None => Ok(()),
        }
    }

    fn set_enabled(&mut self, enabled: bool) -> Result<(), TransferError> {
        self.state.lock().unwrap().enabled = enabled;
        Ok(())
    }

    fn tx(&mut self, device: u8, bytes: &[u8], stop: Stop) -> Result<(), TransferError> {
        let mut state = self.state.lock().unwrap();
        if !state.enabled {
            return Err(TransferError::Controller("bus disabled".to_string()));
        }
        state.ops.push(WireOp::Tx {
            device,
            bytes: bytes.to_vec(),
            no_stop: stop == Stop::NoStop,
        });

        let pending = state.take_pending(device);
        let phase = if pending.is_some() { "data" } else { "address" };
        state.check_ack(device, phase)?;

        if bytes.is_empty() {
            return Err(TransferError::Controller("empty TX frame".to_string()));
        }
        match (pending, stop) {
            (_, Stop::NoStop) => {
                state.pending = Some((device, bytes[0]));
            }
            (Some(register), Stop::Stop) => {
                state.store(device, register, bytes);
            }
            (None, Stop::Stop) => {
                // Packed frame: register address followed by the payload.
                let (register, payload) = bytes.split_first().expect("checked non-empty");
                let register = *register;
                state.store(device, register, payload);
            }
        }
        Ok(())
    }

    fn rx(&mut self, device: u8, buf: &mut [u8]) -> Result<(), TransferError> {
        let mut state = self.state.lock().unwrap();
        if !state.enabled {
            return Err(TransferError::Controller("bus disabled".to_string()));
        }
        state.ops.push(WireOp::Rx {
            device,
            len: buf.len(),
        });

        let pending = state.take_pending(device);
        state.check_ack(device, "read")?;
        match pending {
            Some(register) => state.load(device, register, buf),
            None => state.load_raw(device, buf),
        }
        Ok(())
    }
}

impl SimHandle {
    pub fn add_device(&self, address: u8, increment: Increment) {
        self.state
            .lock()
            .unwrap()
            .devices
            .insert(address, SimDevice::new(increment, None));
    }

    /// Adds a device that only ACKs while `mask` bits are set in register
    /// `gate_register` of `gate_device`.
    pub fn add_gated_device(
        &self,
        address: u8,
        increment: Increment,
        gate_device: u8,
        gate_register: u8,
        mask: u8,
    ) {
        self.state.lock().unwrap().devices.insert(
            address,
            SimDevice::new(increment, Some((gate_device, gate_register, mask))),
        );
    }

    pub fn set_register(&self, device: u8, register: u8, value: u8) {
        if let Some(dev) = self.state.lock().unwrap().devices.get_mut(&device) {
            dev.registers[register as usize] = value;
        }
    }

    pub fn register(&self, device: u8, register: u8) -> Option<u8> {
        self.state
            .lock()
            .unwrap()
            .devices
            .get(&device)
            .map(|d| d.registers[register as usize])
    }

    /// Snapshot of every transfer issued so far, in order.
    pub fn ops(&self) -> Vec<WireOp> {
        self.state.lock().unwrap().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.state.lock().unwrap().ops.clear();
    }

    pub fn set_bring_up_failure(&self, reason: &str) {
        self.state.lock().unwrap().bring_up_failure = Some(reason.to_string());
    }
}
