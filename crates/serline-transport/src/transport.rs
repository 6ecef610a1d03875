//! The transport
//!
//! [`Transport`] owns the configuration and, while open, a session with two
//! handles onto the device: one for the read direction and one for the
//! write direction. A background reader and a foreground writer can share
//! one `Arc<Transport>` without waiting on each other.
//!
//! # Locking
//!
//! Settings and session live behind one `RwLock`. Byte operations hold it
//! shared, then lock only their own direction. Open, close and every
//! configuration change hold it exclusively, so no read or write ever sees
//! a half-applied configuration. Blocking calls wait in slices of at most
//! [`POLL_SLICE`] and release the locks in between, which bounds how long a
//! reconfiguration or `close()` can be held up by a blocked reader.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::backend::{Backend, ClearBuffer, Connector};
use crate::deadline::Deadline;
use crate::error::TransportError;
use crate::framed::{Frame, FramedReader, DEFAULT_TERMINATOR};
use crate::serial::SerialConnector;
use crate::settings::{validate_baud_rate, BackendKind, PortSettings};

/// Longest single wait a blocking call performs while holding the locks
pub const POLL_SLICE: Duration = Duration::from_millis(100);

/// Largest single backend read; also the `read_available` size on backends
/// that cannot report queue depth
const AVAILABLE_CHUNK: usize = 4096;

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy)]
enum Direction {
    Rx,
    Tx,
}

struct Session {
    id: u64,
    kind: BackendKind,
    address: String,
    rx: Mutex<Box<dyn Backend>>,
    tx: Mutex<Box<dyn Backend>>,
    dtr: AtomicBool,
}

impl Session {
    fn open(connector: &dyn Connector, settings: &PortSettings) -> Result<Self, TransportError> {
        let address = settings.require_address()?.to_string();
        validate_baud_rate(settings.baud_rate)?;

        let kind = connector.resolve(&address);
        let rx = connector.connect(kind, settings)?;
        let tx = rx.try_clone()?;

        Ok(Self {
            id: NEXT_SESSION.fetch_add(1, Ordering::Relaxed),
            kind,
            address,
            rx: Mutex::new(rx),
            tx: Mutex::new(tx),
            dtr: AtomicBool::new(false),
        })
    }

    fn backend(&self, direction: Direction) -> &Mutex<Box<dyn Backend>> {
        match direction {
            Direction::Rx => &self.rx,
            Direction::Tx => &self.tx,
        }
    }
}

struct Link {
    settings: PortSettings,
    session: Option<Session>,
}

/// A serial transport
pub struct Transport {
    connector: Arc<dyn Connector>,
    link: RwLock<Link>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let link = self.link.read();
        f.debug_struct("Transport")
            .field("settings", &link.settings)
            .field("open", &link.session.is_some())
            .field("kind", &link.session.as_ref().map(|s| s.kind))
            .finish()
    }
}

/// Wait for one slice, bounded by what is left of `deadline`
fn slice(deadline: &mut Deadline) -> Duration {
    deadline
        .time_left()
        .map_or(POLL_SLICE, |left| left.min(POLL_SLICE))
}

impl Transport {
    /// Create a closed transport with default settings
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self::with_settings(connector, PortSettings::default())
    }

    /// Create a closed transport with specific settings
    ///
    /// The address in `settings` is remembered but not opened.
    pub fn with_settings(connector: Arc<dyn Connector>, settings: PortSettings) -> Self {
        Self {
            connector,
            link: RwLock::new(Link {
                settings,
                session: None,
            }),
        }
    }

    /// Create a closed transport on the OS serial stack
    pub fn serial(settings: PortSettings) -> Self {
        Self::with_settings(Arc::new(SerialConnector::new()), settings)
    }

    /// Open the device at `address`
    ///
    /// An already open session is closed first. The device is acquired
    /// exclusively; if it is missing or held elsewhere this fails with
    /// [`TransportError::DeviceOpen`] and the transport stays closed.
    pub fn open(&self, address: impl Into<String>) -> Result<(), TransportError> {
        let mut link = self.link.write();
        link.settings.address = Some(address.into());
        Self::close_locked(&mut link);

        let session = Session::open(self.connector.as_ref(), &link.settings)?;
        info!(
            "Opened {} ({}) at {} baud",
            session.address, session.kind, link.settings.baud_rate
        );
        link.session = Some(session);
        Ok(())
    }

    /// Release the device; does nothing if already closed
    pub fn close(&self) {
        let mut link = self.link.write();
        Self::close_locked(&mut link);
    }

    fn close_locked(link: &mut Link) {
        if let Some(session) = link.session.take() {
            info!("Closed {}", session.address);
        }
    }

    // Called after a backend reported the device gone. The session id guards
    // against tearing down a newer session opened in the meantime.
    fn drop_session(&self, id: u64) {
        let mut link = self.link.write();
        if link.session.as_ref().is_some_and(|s| s.id == id) {
            if let Some(session) = link.session.take() {
                warn!("Device {} disconnected", session.address);
            }
        }
    }

    /// Run `op` on one direction's backend
    fn with_backend<R>(
        &self,
        direction: Direction,
        op: impl FnOnce(&mut dyn Backend) -> Result<R, TransportError>,
    ) -> Result<R, TransportError> {
        let link = self.link.read();
        let session = link.session.as_ref().ok_or(TransportError::NotOpen)?;
        let id = session.id;

        let mut backend = session.backend(direction).lock();
        let result = op(backend.as_mut());
        drop(backend);
        drop(link);

        if matches!(&result, Err(e) if e.is_disconnect()) {
            self.drop_session(id);
        }
        result
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(TransportError::NotOpen)
        }
    }

    /// Whether a session is live
    pub fn is_open(&self) -> bool {
        self.link.read().session.is_some()
    }

    /// Backend kind of the live session
    pub fn kind(&self) -> Option<BackendKind> {
        self.link.read().session.as_ref().map(|s| s.kind)
    }

    /// Snapshot of the configuration
    pub fn settings(&self) -> PortSettings {
        self.link.read().settings.clone()
    }

    /// Configured address
    pub fn address(&self) -> Option<String> {
        self.link.read().settings.address.clone()
    }

    /// Configured baud rate
    pub fn baud_rate(&self) -> u32 {
        self.link.read().settings.baud_rate
    }

    /// Configured read timeout
    pub fn read_timeout(&self) -> Option<Duration> {
        self.link.read().settings.read_timeout
    }

    /// Configured write timeout
    pub fn write_timeout(&self) -> Option<Duration> {
        self.link.read().settings.write_timeout
    }

    /// Change the address
    ///
    /// While open this re-opens the session on the new address. If that
    /// fails the transport is left closed.
    pub fn set_address(&self, address: impl Into<String>) -> Result<(), TransportError> {
        let address = address.into();
        let mut link = self.link.write();
        let reopen = link.session.is_some();
        link.settings.address = Some(address);

        if reopen {
            Self::close_locked(&mut link);
            let session = Session::open(self.connector.as_ref(), &link.settings)?;
            info!("Re-opened on {}", session.address);
            link.session = Some(session);
        }
        Ok(())
    }

    /// Change the baud rate, applying it to the live device
    pub fn set_baud_rate(&self, baud_rate: u32) -> Result<(), TransportError> {
        let baud_rate = validate_baud_rate(baud_rate)?;
        let mut link = self.link.write();

        let failure = match &link.session {
            Some(session) => session.rx.lock().set_baud_rate(baud_rate).err(),
            None => None,
        };
        if let Some(e) = failure {
            if e.is_disconnect() {
                if let Some(session) = link.session.take() {
                    warn!("Device {} disconnected", session.address);
                }
            }
            return Err(e);
        }

        debug!("Baud rate set to {}", baud_rate);
        link.settings.baud_rate = baud_rate;
        Ok(())
    }

    /// Change the read timeout
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), TransportError> {
        let mut link = self.link.write();
        debug!("Read timeout set to {:?}", timeout);
        link.settings.read_timeout = timeout;
        Ok(())
    }

    /// Change the write timeout
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<(), TransportError> {
        let mut link = self.link.write();
        debug!("Write timeout set to {:?}", timeout);
        link.settings.write_timeout = timeout;
        Ok(())
    }

    /// Read up to `n` bytes, waiting up to the read timeout
    ///
    /// Returns fewer bytes (possibly none) if the timeout elapses first.
    pub fn read(&self, n: usize) -> Result<Vec<u8>, TransportError> {
        self.ensure_open()?;
        let mut deadline = Deadline::new(self.read_timeout());
        self.read_within(n, &mut deadline)
    }

    /// Read up to `n` bytes before `deadline` closes
    pub(crate) fn read_within(
        &self,
        n: usize,
        deadline: &mut Deadline,
    ) -> Result<Vec<u8>, TransportError> {
        let mut received = Vec::new();
        let mut scratch = vec![0u8; n.min(AVAILABLE_CHUNK)];

        while received.len() < n {
            let wait = slice(deadline);
            let want = (n - received.len()).min(scratch.len());
            match self.with_backend(Direction::Rx, |b| b.read(&mut scratch[..want], wait)) {
                Ok(got) => received.extend_from_slice(&scratch[..got]),
                Err(TransportError::Disconnected { address, partial }) => {
                    received.extend_from_slice(&partial);
                    return Err(TransportError::Disconnected {
                        address,
                        partial: received,
                    });
                }
                // Closed from another thread; hand back what already arrived.
                Err(TransportError::NotOpen) if !received.is_empty() => break,
                Err(e) => return Err(e),
            }
            if deadline.expired() {
                break;
            }
        }

        Ok(received)
    }

    /// Read whatever is queued right now, without waiting
    pub fn read_available(&self) -> Result<Vec<u8>, TransportError> {
        let n = self.input_waiting()?.unwrap_or(AVAILABLE_CHUNK);
        if n == 0 {
            return Ok(Vec::new());
        }
        let mut deadline = Deadline::new(Some(Duration::ZERO));
        self.read_within(n, &mut deadline)
    }

    /// Read until `terminator`, `max_len` bytes, or the read timeout
    ///
    /// See [`FramedReader`] for the exact rules.
    pub fn read_until(
        &self,
        terminator: &[u8],
        max_len: Option<usize>,
    ) -> Result<Frame, TransportError> {
        FramedReader::new(self, terminator)
            .max_len(max_len)
            .next_frame()
    }

    /// Read one newline-terminated line
    pub fn read_line(&self) -> Result<Frame, TransportError> {
        self.read_until(DEFAULT_TERMINATOR, None)
    }

    /// Write all of `data`
    ///
    /// Text is written as its UTF-8 bytes. With a positive write timeout the
    /// call fails with [`TransportError::WriteTimeout`] if the device does
    /// not accept everything in time; without one it waits indefinitely. A
    /// zero timeout makes a single attempt and returns how much was taken.
    pub fn write(&self, data: impl AsRef<[u8]>) -> Result<usize, TransportError> {
        let data = data.as_ref();
        self.ensure_open()?;

        let total = data.len();
        let mut deadline = Deadline::new(self.write_timeout());
        let non_blocking = deadline.is_non_blocking();
        let mut written = 0;

        while written < total {
            let wait = slice(&mut deadline);
            let accepted =
                self.with_backend(Direction::Tx, |b| b.write(&data[written..], wait))?;
            written += accepted;
            if non_blocking {
                break;
            }
            if written < total && deadline.expired() {
                return Err(TransportError::WriteTimeout { written, total });
            }
        }
        Ok(written)
    }

    /// Wait until all written data has been transmitted
    pub fn flush(&self) -> Result<(), TransportError> {
        self.with_backend(Direction::Tx, |b| b.flush())
    }

    /// Discard received data that has not been read
    pub fn flush_input(&self) -> Result<(), TransportError> {
        self.with_backend(Direction::Rx, |b| b.clear(ClearBuffer::Input))
    }

    /// Discard written data that has not been transmitted
    pub fn flush_output(&self) -> Result<(), TransportError> {
        self.with_backend(Direction::Tx, |b| b.clear(ClearBuffer::Output))
    }

    /// Drive DTR; returns false if the backend has no control lines
    pub fn set_dtr(&self, level: bool) -> Result<bool, TransportError> {
        let applied = self.with_backend(Direction::Tx, |b| b.set_dtr(level))?;
        if applied {
            if let Some(session) = &self.link.read().session {
                session.dtr.store(level, Ordering::Relaxed);
            }
        }
        Ok(applied)
    }

    /// Drive RTS; returns false if the backend has no control lines
    pub fn set_rts(&self, level: bool) -> Result<bool, TransportError> {
        self.with_backend(Direction::Tx, |b| b.set_rts(level))
    }

    /// Last DTR level applied in this session
    pub fn dtr(&self) -> bool {
        self.link
            .read()
            .session
            .as_ref()
            .is_some_and(|s| s.dtr.load(Ordering::Relaxed))
    }

    /// Bytes queued for reading, `None` if the backend cannot tell
    pub fn input_waiting(&self) -> Result<Option<usize>, TransportError> {
        self.with_backend(Direction::Rx, |b| b.bytes_waiting())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_transport_is_closed() {
        let transport = Transport::serial(PortSettings::default());
        assert!(!transport.is_open());
        assert_eq!(transport.kind(), None);
        assert_eq!(transport.address(), None);
        assert_eq!(transport.baud_rate(), 921_600);
    }

    #[test]
    fn test_byte_ops_require_open() {
        let transport = Transport::serial(PortSettings::default());

        assert!(matches!(transport.read(1), Err(TransportError::NotOpen)));
        assert!(matches!(transport.read(0), Err(TransportError::NotOpen)));
        assert!(matches!(transport.write("hi"), Err(TransportError::NotOpen)));
        assert!(matches!(transport.write(b""), Err(TransportError::NotOpen)));
        assert!(matches!(
            transport.read_until(b"}", None),
            Err(TransportError::NotOpen)
        ));
        assert!(matches!(
            transport.read_available(),
            Err(TransportError::NotOpen)
        ));
        assert!(matches!(transport.flush(), Err(TransportError::NotOpen)));
        assert!(matches!(transport.flush_input(), Err(TransportError::NotOpen)));
        assert!(matches!(transport.flush_output(), Err(TransportError::NotOpen)));
        assert!(matches!(transport.set_dtr(true), Err(TransportError::NotOpen)));
        assert!(matches!(transport.set_rts(true), Err(TransportError::NotOpen)));
        assert!(matches!(
            transport.input_waiting(),
            Err(TransportError::NotOpen)
        ));
        assert!(!transport.dtr());
    }

    #[test]
    fn test_close_is_idempotent() {
        let transport = Transport::serial(PortSettings::default());
        transport.close();
        transport.close();
        assert!(!transport.is_open());
    }

    #[test]
    fn test_open_missing_device_fails() {
        let transport = Transport::serial(PortSettings::default());
        let err = transport.open("/dev/serline-does-not-exist").unwrap_err();

        assert!(matches!(err, TransportError::DeviceOpen { .. }));
        assert!(!transport.is_open());
        assert_eq!(
            transport.address().as_deref(),
            Some("/dev/serline-does-not-exist")
        );
    }

    #[test]
    fn test_setters_while_closed() {
        let transport = Transport::serial(PortSettings::default());

        transport.set_baud_rate(115_200).unwrap();
        transport.set_read_timeout(None).unwrap();
        transport
            .set_write_timeout(Some(Duration::from_millis(50)))
            .unwrap();
        transport.set_address("COM4").unwrap();

        let settings = transport.settings();
        assert_eq!(settings.baud_rate, 115_200);
        assert_eq!(settings.read_timeout, None);
        assert_eq!(settings.write_timeout, Some(Duration::from_millis(50)));
        assert_eq!(settings.address.as_deref(), Some("COM4"));
        assert!(!transport.is_open());
    }

    #[test]
    fn test_zero_baud_rejected() {
        let transport = Transport::serial(PortSettings::default());
        assert!(matches!(
            transport.set_baud_rate(0),
            Err(TransportError::InvalidSetting(_))
        ));
        assert_eq!(transport.baud_rate(), 921_600);
    }

    #[test]
    fn test_slice_bounds() {
        let mut infinite = Deadline::new(None);
        assert_eq!(slice(&mut infinite), POLL_SLICE);

        let mut short = Deadline::new(Some(Duration::from_millis(10)));
        assert!(slice(&mut short) <= Duration::from_millis(10));

        let mut non_blocking = Deadline::new(Some(Duration::ZERO));
        assert_eq!(slice(&mut non_blocking), Duration::ZERO);
    }
}
