//! Standard serial backend
//!
//! Wraps the `serialport` crate. Devices are opened exclusively: on Unix
//! the tty is locked with `TIOCEXCL`, so a second open from any process
//! fails instead of silently sharing the line. Windows COM handles are
//! exclusive by nature.

use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::{SerialPort, SerialPortBuilder};
use tracing::{debug, trace};

use crate::backend::{Backend, ClearBuffer, Connector};
use crate::error::TransportError;
use crate::settings::{validate_baud_rate, BackendKind, PortSettings};

/// Serial device handle
pub struct SerialBackend {
    address: String,
    port: Box<dyn SerialPort>,
}

impl std::fmt::Debug for SerialBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialBackend")
            .field("address", &self.address)
            .field("port", &"<serial port>")
            .finish()
    }
}

impl SerialBackend {
    /// Open `settings.address` exclusively at `settings.baud_rate`
    pub fn open(settings: &PortSettings) -> Result<Self, TransportError> {
        let address = settings.require_address()?;
        let baud_rate = validate_baud_rate(settings.baud_rate)?;

        debug!("Opening {} at {} baud", address, baud_rate);
        let builder = serialport::new(address, baud_rate).timeout(Duration::ZERO);
        let port = open_exclusive(builder, address)?;

        Ok(Self {
            address: address.to_string(),
            port,
        })
    }

    // Handles keep their own timeout; only touch it when it changes.
    // On Windows a cloned handle shares COMMTIMEOUTS with the original.
    fn set_wait(&mut self, wait: Duration) -> Result<(), TransportError> {
        if self.port.timeout() != wait {
            self.port
                .set_timeout(wait)
                .map_err(|e| classify_serial(&self.address, e))?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn open_exclusive(
    builder: SerialPortBuilder,
    address: &str,
) -> Result<Box<dyn SerialPort>, TransportError> {
    let mut port = builder
        .open_native()
        .map_err(|e| TransportError::open_failed(address, e))?;
    port.set_exclusive(true)
        .map_err(|e| TransportError::open_failed(address, e))?;
    Ok(Box::new(port))
}

#[cfg(not(unix))]
fn open_exclusive(
    builder: SerialPortBuilder,
    address: &str,
) -> Result<Box<dyn SerialPort>, TransportError> {
    builder
        .open()
        .map_err(|e| TransportError::open_failed(address, e))
}

/// Map an I/O failure to a transport error
pub(crate) fn classify_io(address: &str, err: io::Error) -> TransportError {
    match err.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::NotConnected
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::UnexpectedEof
        | io::ErrorKind::NotFound => TransportError::disconnected(address),
        _ => TransportError::Io {
            address: address.to_string(),
            source: err,
        },
    }
}

fn classify_serial(address: &str, err: serialport::Error) -> TransportError {
    match err.kind() {
        serialport::ErrorKind::NoDevice => TransportError::disconnected(address),
        _ => classify_io(address, io::Error::from(err)),
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

impl Backend for SerialBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::StandardSerial
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn read(&mut self, buf: &mut [u8], wait: Duration) -> Result<usize, TransportError> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.set_wait(wait)?;
        loop {
            match self.port.read(buf) {
                Ok(n) => {
                    trace!("Read {} bytes from {}", n, self.address);
                    return Ok(n);
                }
                Err(e) if is_timeout(&e) => return Ok(0),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(classify_io(&self.address, e)),
            }
        }
    }

    fn write(&mut self, data: &[u8], wait: Duration) -> Result<usize, TransportError> {
        if data.is_empty() {
            return Ok(0);
        }
        self.set_wait(wait)?;
        loop {
            match self.port.write(data) {
                Ok(n) => {
                    trace!("Wrote {} bytes to {}", n, self.address);
                    return Ok(n);
                }
                Err(e) if is_timeout(&e) => return Ok(0),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(classify_io(&self.address, e)),
            }
        }
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        self.port
            .flush()
            .map_err(|e| classify_io(&self.address, e))
    }

    fn clear(&mut self, buffer: ClearBuffer) -> Result<(), TransportError> {
        let which = match buffer {
            ClearBuffer::Input => serialport::ClearBuffer::Input,
            ClearBuffer::Output => serialport::ClearBuffer::Output,
            ClearBuffer::All => serialport::ClearBuffer::All,
        };
        self.port
            .clear(which)
            .map_err(|e| classify_serial(&self.address, e))
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), TransportError> {
        self.port
            .set_baud_rate(baud_rate)
            .map_err(|e| classify_serial(&self.address, e))
    }

    fn set_dtr(&mut self, level: bool) -> Result<bool, TransportError> {
        self.port
            .write_data_terminal_ready(level)
            .map_err(|e| classify_serial(&self.address, e))?;
        Ok(true)
    }

    fn set_rts(&mut self, level: bool) -> Result<bool, TransportError> {
        self.port
            .write_request_to_send(level)
            .map_err(|e| classify_serial(&self.address, e))?;
        Ok(true)
    }

    fn bytes_waiting(&mut self) -> Result<Option<usize>, TransportError> {
        let n = self
            .port
            .bytes_to_read()
            .map_err(|e| classify_serial(&self.address, e))?;
        Ok(Some(n as usize))
    }

    fn try_clone(&self) -> Result<Box<dyn Backend>, TransportError> {
        let port = self
            .port
            .try_clone()
            .map_err(|e| classify_serial(&self.address, e))?;
        Ok(Box::new(SerialBackend {
            address: self.address.clone(),
            port,
        }))
    }
}

/// Connector that treats every address as an OS serial device
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialConnector;

impl SerialConnector {
    /// Create a new serial connector
    pub fn new() -> Self {
        Self
    }
}

impl Connector for SerialConnector {
    fn resolve(&self, _address: &str) -> BackendKind {
        BackendKind::StandardSerial
    }

    fn connect(
        &self,
        kind: BackendKind,
        settings: &PortSettings,
    ) -> Result<Box<dyn Backend>, TransportError> {
        match kind {
            BackendKind::StandardSerial => Ok(Box::new(SerialBackend::open(settings)?)),
            BackendKind::VendorUsbBridge => Err(TransportError::open_failed(
                settings.address.as_deref().unwrap_or("<unset>"),
                "no vendor bridge backend available",
            )),
        }
    }
}
