//! Error types for serial transports

use thiserror::Error;

/// Errors that can occur on a transport
///
/// There is deliberately no read-timeout variant: a read that times out
/// returns fewer bytes than requested (possibly none).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The device could not be opened (missing, or held by another owner)
    #[error("failed to open {address}: {reason}")]
    DeviceOpen { address: String, reason: String },

    /// A byte operation was attempted while the transport is closed
    #[error("transport is not open")]
    NotOpen,

    /// The write timeout elapsed before all bytes were accepted
    #[error("write timed out after {written} of {total} bytes")]
    WriteTimeout { written: usize, total: usize },

    /// The device went away; the transport has been closed
    ///
    /// `partial` holds bytes received by the failing call before the
    /// device disappeared.
    #[error("device {address} disconnected")]
    Disconnected { address: String, partial: Vec<u8> },

    /// A configuration value was rejected
    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    /// Any other I/O failure reported by the backend
    #[error("I/O error on {address}: {source}")]
    Io {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

impl TransportError {
    /// Build an open failure for `address`
    pub fn open_failed(address: impl Into<String>, reason: impl ToString) -> Self {
        Self::DeviceOpen {
            address: address.into(),
            reason: reason.to_string(),
        }
    }

    /// Build a disconnection error without any pending bytes
    pub fn disconnected(address: impl Into<String>) -> Self {
        Self::Disconnected {
            address: address.into(),
            partial: Vec::new(),
        }
    }

    /// Whether this error means the device is gone for good
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected { .. })
    }
}
