//! Backend traits
//!
//! A [`Backend`] is one open handle onto a device. A [`Connector`] decides
//! which kind of backend serves an address and opens it. The transport
//! only ever talks to these two traits, so the standard serial stack, a
//! vendor bridge, and the simulated devices used in tests are
//! interchangeable.

use std::time::Duration;

use crate::error::TransportError;
use crate::settings::{BackendKind, PortSettings};

/// Which buffered direction to discard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearBuffer {
    /// Received but not yet read
    Input,
    /// Written but not yet transmitted
    Output,
    /// Both directions
    All,
}

/// An open device handle
///
/// Reads and writes take an explicit wait bound. A wait that elapses is
/// not an error: `read` returns `Ok(0)` and `write` returns the number of
/// bytes accepted so far (possibly zero). Backends report a device that is
/// gone as [`TransportError::Disconnected`].
pub trait Backend: Send {
    /// The kind of this backend
    fn kind(&self) -> BackendKind;

    /// Address the backend was opened on
    fn address(&self) -> &str;

    /// Read whatever is available, waiting up to `wait` for the first byte
    fn read(&mut self, buf: &mut [u8], wait: Duration) -> Result<usize, TransportError>;

    /// Write as much of `data` as the device accepts within `wait`
    fn write(&mut self, data: &[u8], wait: Duration) -> Result<usize, TransportError>;

    /// Block until written data has been transmitted
    fn flush(&mut self) -> Result<(), TransportError>;

    /// Discard buffered data
    fn clear(&mut self, buffer: ClearBuffer) -> Result<(), TransportError>;

    /// Change the line speed of the live device
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), TransportError>;

    /// Drive DTR; returns false if the backend has no control lines
    fn set_dtr(&mut self, _level: bool) -> Result<bool, TransportError> {
        Ok(false)
    }

    /// Drive RTS; returns false if the backend has no control lines
    fn set_rts(&mut self, _level: bool) -> Result<bool, TransportError> {
        Ok(false)
    }

    /// Bytes queued for reading, if the backend can tell
    fn bytes_waiting(&mut self) -> Result<Option<usize>, TransportError> {
        Ok(None)
    }

    /// A second handle onto the same device
    ///
    /// The transport reads through one handle and writes through the other
    /// so the two directions never wait on each other.
    fn try_clone(&self) -> Result<Box<dyn Backend>, TransportError>;
}

/// Resolves addresses to backends
pub trait Connector: Send + Sync {
    /// Which kind of backend serves `address`
    fn resolve(&self, address: &str) -> BackendKind;

    /// Open `settings.address` exclusively with a backend of `kind`
    fn connect(
        &self,
        kind: BackendKind,
        settings: &PortSettings,
    ) -> Result<Box<dyn Backend>, TransportError>;
}
