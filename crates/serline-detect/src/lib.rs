//! Serial Port Detection Library
//!
//! This crate lists the ports a transport can open and routes each address
//! to the backend that serves it.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serline_detect::PortScanner;
//! use serline_transport::Transport;
//!
//! let scanner = Arc::new(PortScanner::new());
//! let ports = scanner.list(None, None).unwrap();
//!
//! if let Some(address) = ports.first() {
//!     let transport = Transport::new(scanner.clone());
//!     transport.open(address.as_str()).unwrap();
//! }
//! ```

pub mod error;
pub mod scanner;
pub mod usb_ids;

pub use error::DetectError;
pub use scanner::{BridgeProvider, PortInfo, PortScanner, ScannerConfig};
