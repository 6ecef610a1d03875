//! Serial Device Simulation Library
//!
//! This crate provides stand-ins for real hardware so transports can be
//! tested end to end:
//!
//! - **SimDevice**: the far end of a line, with loopback, stalls and unplugging
//! - **SimConnector**: a registry of devices a transport can open by address
//! - **SimBridge**: a vendor USB bridge for a `PortScanner`
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use serline_sim::{SimConnector, SimDevice};
//! use serline_transport::{PortSettings, Transport};
//!
//! let connector = SimConnector::new();
//! let device = connector.add(SimDevice::loopback("/dev/ttyACM0"));
//!
//! let transport = Transport::with_settings(
//!     connector.shared(),
//!     PortSettings::default().with_read_timeout(Some(Duration::from_millis(50))),
//! );
//! transport.open("/dev/ttyACM0").unwrap();
//! transport.write("ping\n").unwrap();
//!
//! let frame = transport.read_line().unwrap();
//! assert_eq!(frame.bytes(), b"ping\n");
//! assert_eq!(device.written(), b"ping\n");
//! ```

pub mod bridge;
pub mod connector;
pub mod device;

pub use bridge::SimBridge;
pub use connector::SimConnector;
pub use device::{SimBackend, SimDevice};
