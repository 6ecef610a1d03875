//! Simulated device registry
//!
//! [`SimConnector`] plays the part of the OS: addresses registered with it
//! can be opened by a [`Transport`](serline_transport::Transport), anything
//! else fails the way a missing device node does.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serline_transport::{Backend, BackendKind, Connector, PortSettings, TransportError};

use crate::device::SimDevice;

/// Registry of simulated devices
#[derive(Debug, Default)]
pub struct SimConnector {
    devices: Mutex<HashMap<String, SimDevice>>,
}

impl SimConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `device` under its address, replacing any previous one
    pub fn add(&self, device: SimDevice) -> SimDevice {
        self.devices
            .lock()
            .insert(device.address().to_string(), device.clone());
        device
    }

    /// Register a standard serial device at `address`
    pub fn add_serial(&self, address: &str) -> SimDevice {
        self.add(SimDevice::new(address, BackendKind::StandardSerial))
    }

    /// Remove the device at `address`
    pub fn remove(&self, address: &str) -> Option<SimDevice> {
        self.devices.lock().remove(address)
    }

    pub fn device(&self, address: &str) -> Option<SimDevice> {
        self.devices.lock().get(address).cloned()
    }

    /// Registered addresses, sorted
    pub fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.devices.lock().keys().cloned().collect();
        addresses.sort();
        addresses
    }

    /// Shorthand for sharing with a transport
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl Connector for SimConnector {
    fn resolve(&self, address: &str) -> BackendKind {
        self.device(address)
            .map_or(BackendKind::StandardSerial, |d| d.kind())
    }

    fn connect(
        &self,
        _kind: BackendKind,
        settings: &PortSettings,
    ) -> Result<Box<dyn Backend>, TransportError> {
        let address = settings.require_address()?;
        let device = self
            .device(address)
            .ok_or_else(|| TransportError::open_failed(address, "no such device"))?;
        Ok(Box::new(device.open(settings.baud_rate)?))
    }
}
