//! Simulated vendor USB bridge
//!
//! Plugs into a [`PortScanner`](serline_detect::PortScanner) so that bridge
//! routing can be exercised without the vendor driver.

use std::sync::Arc;

use parking_lot::Mutex;
use serline_detect::BridgeProvider;
use serline_transport::{Backend, BackendKind, PortSettings, TransportError};
use tracing::debug;

use crate::device::SimDevice;

/// A bridge whose attached devices are [`SimDevice`]s
#[derive(Debug, Default)]
pub struct SimBridge {
    devices: Mutex<Vec<SimDevice>>,
}

impl SimBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a bridge device at `address`
    pub fn attach(&self, address: &str) -> SimDevice {
        let device = SimDevice::new(address, BackendKind::VendorUsbBridge);
        self.devices.lock().push(device.clone());
        debug!("Attached simulated bridge device {}", address);
        device
    }

    /// Detach the device at `address`; an open session sees a disconnect
    pub fn detach(&self, address: &str) {
        let mut devices = self.devices.lock();
        if let Some(pos) = devices.iter().position(|d| d.address() == address) {
            devices.remove(pos).disconnect();
        }
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl BridgeProvider for SimBridge {
    fn list(&self) -> Vec<String> {
        self.devices
            .lock()
            .iter()
            .map(|d| d.address().to_string())
            .collect()
    }

    fn connect(&self, settings: &PortSettings) -> Result<Box<dyn Backend>, TransportError> {
        let address = settings.require_address()?;
        let device = self
            .devices
            .lock()
            .iter()
            .find(|d| d.address() == address)
            .cloned()
            .ok_or_else(|| TransportError::open_failed(address, "bridge device not attached"))?;
        Ok(Box::new(device.open(settings.baud_rate)?))
    }
}
