//! Simulated device
//!
//! A [`SimDevice`] stands in for the far end of a serial line. Tests push
//! bytes for the transport to read, inspect what the transport wrote, and
//! pull the plug. The device honours exclusive acquisition: while any
//! backend handle is open on it, a second open fails.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serline_transport::{Backend, BackendKind, ClearBuffer, TransportError, DEFAULT_BAUD_RATE};
use tracing::{debug, trace};

#[derive(Debug)]
struct DeviceState {
    /// Bytes waiting for the transport to read
    incoming: VecDeque<u8>,
    /// Everything the transport wrote
    written: Vec<u8>,
    /// Feed written bytes back into `incoming`
    loopback: bool,
    connected: bool,
    held: bool,
    baud_rate: u32,
    dtr: bool,
    rts: bool,
    /// Most bytes accepted per write call; `Some(0)` stalls writes
    write_capacity: Option<usize>,
}

#[derive(Debug)]
struct Shared {
    address: String,
    kind: BackendKind,
    state: Mutex<DeviceState>,
    arrived: Condvar,
}

/// A simulated device; clones share the same device
#[derive(Debug, Clone)]
pub struct SimDevice {
    shared: Arc<Shared>,
}

impl SimDevice {
    /// Create a connected device with no data
    pub fn new(address: impl Into<String>, kind: BackendKind) -> Self {
        Self {
            shared: Arc::new(Shared {
                address: address.into(),
                kind,
                state: Mutex::new(DeviceState {
                    incoming: VecDeque::new(),
                    written: Vec::new(),
                    loopback: false,
                    connected: true,
                    held: false,
                    baud_rate: DEFAULT_BAUD_RATE,
                    dtr: false,
                    rts: false,
                    write_capacity: None,
                }),
                arrived: Condvar::new(),
            }),
        }
    }

    /// A standard serial device that echoes everything written to it
    pub fn loopback(address: impl Into<String>) -> Self {
        let device = Self::new(address, BackendKind::StandardSerial);
        device.shared.state.lock().loopback = true;
        device
    }

    pub fn address(&self) -> &str {
        &self.shared.address
    }

    pub fn kind(&self) -> BackendKind {
        self.shared.kind
    }

    /// Make bytes available to the transport
    pub fn push(&self, data: &[u8]) {
        let mut state = self.shared.state.lock();
        state.incoming.extend(data);
        self.shared.arrived.notify_all();
    }

    /// Bytes written so far, leaving them in place
    pub fn written(&self) -> Vec<u8> {
        self.shared.state.lock().written.clone()
    }

    /// Bytes written so far, clearing the log
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.shared.state.lock().written)
    }

    /// Bytes not yet read by the transport
    pub fn pending(&self) -> usize {
        self.shared.state.lock().incoming.len()
    }

    /// Unplug the device; blocked reads fail at once
    pub fn disconnect(&self) {
        debug!("Simulating disconnect of {}", self.shared.address);
        let mut state = self.shared.state.lock();
        state.connected = false;
        state.incoming.clear();
        self.shared.arrived.notify_all();
    }

    /// Plug the device back in
    pub fn reconnect(&self) {
        self.shared.state.lock().connected = true;
    }

    /// Limit how many bytes one write call accepts
    pub fn set_write_capacity(&self, capacity: Option<usize>) {
        self.shared.state.lock().write_capacity = capacity;
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.lock().connected
    }

    /// Whether a backend currently holds the device
    pub fn is_held(&self) -> bool {
        self.shared.state.lock().held
    }

    pub fn baud_rate(&self) -> u32 {
        self.shared.state.lock().baud_rate
    }

    pub fn dtr(&self) -> bool {
        self.shared.state.lock().dtr
    }

    pub fn rts(&self) -> bool {
        self.shared.state.lock().rts
    }

    /// Acquire the device exclusively
    pub fn open(&self, baud_rate: u32) -> Result<SimBackend, TransportError> {
        let mut state = self.shared.state.lock();
        if !state.connected {
            return Err(TransportError::open_failed(
                self.address(),
                "no such device",
            ));
        }
        if state.held {
            return Err(TransportError::open_failed(self.address(), "device busy"));
        }
        state.held = true;
        state.baud_rate = baud_rate;
        drop(state);

        debug!("Opened simulated {} ({})", self.address(), self.kind());
        Ok(SimBackend {
            device: self.clone(),
            _lease: Arc::new(Lease {
                device: self.clone(),
            }),
        })
    }
}

/// Releases the device when the last handle goes away
#[derive(Debug)]
struct Lease {
    device: SimDevice,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.device.shared.state.lock().held = false;
    }
}

/// Backend handle onto a [`SimDevice`]
#[derive(Debug)]
pub struct SimBackend {
    device: SimDevice,
    _lease: Arc<Lease>,
}

impl SimBackend {
    fn has_control_lines(&self) -> bool {
        self.device.kind() == BackendKind::StandardSerial
    }

    fn gone(&self) -> TransportError {
        TransportError::disconnected(self.device.address())
    }
}

impl Backend for SimBackend {
    fn kind(&self) -> BackendKind {
        self.device.kind()
    }

    fn address(&self) -> &str {
        self.device.address()
    }

    fn read(&mut self, buf: &mut [u8], wait: Duration) -> Result<usize, TransportError> {
        let shared = &self.device.shared;
        let give_up = Instant::now().checked_add(wait);
        let mut state = shared.state.lock();

        loop {
            if !state.connected {
                return Err(self.gone());
            }
            if !state.incoming.is_empty() || buf.is_empty() {
                break;
            }
            match give_up {
                Some(at) => {
                    if shared.arrived.wait_until(&mut state, at).timed_out() {
                        if !state.connected {
                            return Err(self.gone());
                        }
                        break;
                    }
                }
                None => shared.arrived.wait(&mut state),
            }
        }

        let n = buf.len().min(state.incoming.len());
        for (slot, byte) in buf.iter_mut().zip(state.incoming.drain(..n)) {
            *slot = byte;
        }
        trace!("Simulated read of {} bytes", n);
        Ok(n)
    }

    fn write(&mut self, data: &[u8], wait: Duration) -> Result<usize, TransportError> {
        let mut state = self.device.shared.state.lock();
        if !state.connected {
            return Err(self.gone());
        }

        let accepted = state.write_capacity.map_or(data.len(), |c| c.min(data.len()));
        if accepted == 0 && !data.is_empty() {
            // A stalled device holds the writer for the whole wait.
            drop(state);
            thread::sleep(wait);
            return Ok(0);
        }

        state.written.extend_from_slice(&data[..accepted]);
        if state.loopback {
            state.incoming.extend(&data[..accepted]);
            self.device.shared.arrived.notify_all();
        }
        Ok(accepted)
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        if !self.device.is_connected() {
            return Err(self.gone());
        }
        Ok(())
    }

    fn clear(&mut self, buffer: ClearBuffer) -> Result<(), TransportError> {
        let mut state = self.device.shared.state.lock();
        if !state.connected {
            return Err(self.gone());
        }
        // Writes are transmitted immediately, so only input can be pending.
        if matches!(buffer, ClearBuffer::Input | ClearBuffer::All) {
            state.incoming.clear();
        }
        Ok(())
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), TransportError> {
        let mut state = self.device.shared.state.lock();
        if !state.connected {
            return Err(self.gone());
        }
        state.baud_rate = baud_rate;
        Ok(())
    }

    fn set_dtr(&mut self, level: bool) -> Result<bool, TransportError> {
        if !self.has_control_lines() {
            return Ok(false);
        }
        self.device.shared.state.lock().dtr = level;
        Ok(true)
    }

    fn set_rts(&mut self, level: bool) -> Result<bool, TransportError> {
        if !self.has_control_lines() {
            return Ok(false);
        }
        self.device.shared.state.lock().rts = level;
        Ok(true)
    }

    fn bytes_waiting(&mut self) -> Result<Option<usize>, TransportError> {
        if !self.has_control_lines() {
            return Ok(None);
        }
        Ok(Some(self.device.pending()))
    }

    fn try_clone(&self) -> Result<Box<dyn Backend>, TransportError> {
        Ok(Box::new(SimBackend {
            device: self.device.clone(),
            _lease: self._lease.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclusive_open() {
        let device = SimDevice::new("sim0", BackendKind::StandardSerial);

        let first = device.open(9600).unwrap();
        assert!(device.is_held());
        assert!(matches!(
            device.open(9600),
            Err(TransportError::DeviceOpen { .. })
        ));

        let clone = first.try_clone().unwrap();
        drop(first);
        assert!(device.is_held());
        drop(clone);
        assert!(!device.is_held());
        assert!(device.open(9600).is_ok());
    }

    #[test]
    fn test_read_waits_for_data() {
        let device = SimDevice::new("sim0", BackendKind::StandardSerial);
        let mut backend = device.open(9600).unwrap();
        let mut buf = [0u8; 8];

        let started = Instant::now();
        assert_eq!(backend.read(&mut buf, Duration::from_millis(30)).unwrap(), 0);
        assert!(started.elapsed() >= Duration::from_millis(30));

        device.push(b"hey");
        assert_eq!(backend.read(&mut buf, Duration::from_millis(30)).unwrap(), 3);
        assert_eq!(&buf[..3], b"hey");
    }

    #[test]
    fn test_loopback_echo() {
        let device = SimDevice::loopback("loop0");
        let mut backend = device.open(9600).unwrap();
        let mut buf = [0u8; 8];

        assert_eq!(backend.write(b"ping", Duration::ZERO).unwrap(), 4);
        assert_eq!(backend.read(&mut buf, Duration::ZERO).unwrap(), 4);
        assert_eq!(&buf[..4], b"ping");
        assert_eq!(device.written(), b"ping");
    }

    #[test]
    fn test_disconnect_wakes_reader() {
        let device = SimDevice::new("sim0", BackendKind::StandardSerial);
        let mut backend = device.open(9600).unwrap();

        let unplug = device.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            unplug.disconnect();
        });

        let mut buf = [0u8; 1];
        let err = backend.read(&mut buf, Duration::from_secs(5)).unwrap_err();
        assert!(err.is_disconnect());
        handle.join().unwrap();
    }

    #[test]
    fn test_bridge_has_no_control_lines() {
        let device = SimDevice::new("usb#0", BackendKind::VendorUsbBridge);
        let mut backend = device.open(9600).unwrap();

        assert!(!backend.set_dtr(true).unwrap());
        assert!(!backend.set_rts(true).unwrap());
        assert_eq!(backend.bytes_waiting().unwrap(), None);
        assert!(!device.dtr());
    }
}
