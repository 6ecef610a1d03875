//! Serial Transport Library
//!
//! This crate provides a line-level abstraction over serial devices:
//!
//! - **Deadline**: a monotonic timeout window that survives backward clock jumps
//! - **Transport**: open/close, byte read/write, line control and queue depth
//!   over interchangeable backends
//! - **FramedReader**: terminator- or size-bounded reads that return partial
//!   data on timeout instead of failing
//! - **Receiver**: a background loop that drains a shared transport
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use serline_transport::{PortSettings, Transport};
//!
//! let transport = Transport::serial(
//!     PortSettings::default().with_read_timeout(Some(Duration::from_millis(100))),
//! );
//! transport.open("/dev/ttyACM0").unwrap();
//! transport.write("status\n").unwrap();
//!
//! let frame = transport.read_until(b"}", None).unwrap();
//! if frame.is_complete() {
//!     println!("{:?}", String::from_utf8_lossy(frame.bytes()));
//! }
//! ```

pub mod backend;
pub mod deadline;
pub mod error;
pub mod framed;
pub mod receiver;
pub mod serial;
pub mod settings;
pub mod transport;

pub use backend::{Backend, ClearBuffer, Connector};
pub use deadline::{Clock, Deadline, ManualClock, MonotonicClock};
pub use error::TransportError;
pub use framed::{Frame, FrameEnd, FramedReader, DEFAULT_TERMINATOR};
pub use receiver::{run_receiver, spawn_receiver, ReceiveEvent, ReceiveMode, ReceiverExit};
pub use serial::{SerialBackend, SerialConnector};
pub use settings::{BackendKind, PortSettings, DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT};
pub use transport::{Transport, POLL_SLICE};

// Re-exported so callers can stop a receiver without naming tokio-util.
pub use tokio_util::sync::CancellationToken;
