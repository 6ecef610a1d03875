//! Port configuration

use std::fmt;
use std::time::Duration;

use crate::error::TransportError;

/// Default baud rate for newly created transports
pub const DEFAULT_BAUD_RATE: u32 = 921_600;

/// Default read timeout for newly created transports
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Which device-access mechanism serves an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BackendKind {
    /// An OS serial device (COM port, tty, USB-CDC)
    StandardSerial,
    /// A vendor USB bridge driven without the OS serial stack
    VendorUsbBridge,
}

impl BackendKind {
    /// Returns a human-readable name for the backend kind
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::StandardSerial => "serial",
            BackendKind::VendorUsbBridge => "usb bridge",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Configuration of a transport
///
/// Timeouts use `None` for "wait forever" and `Duration::ZERO` for
/// non-blocking operation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PortSettings {
    /// Device address (e.g., /dev/ttyACM0, COM3)
    pub address: Option<String>,
    /// Line speed
    pub baud_rate: u32,
    /// How long a read may wait for data
    #[cfg_attr(feature = "serde", serde(with = "secs"))]
    pub read_timeout: Option<Duration>,
    /// How long a write may wait for the device to accept data
    #[cfg_attr(feature = "serde", serde(with = "secs"))]
    pub write_timeout: Option<Duration>,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            address: None,
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: Some(DEFAULT_READ_TIMEOUT),
            write_timeout: None,
        }
    }
}

impl PortSettings {
    /// Default settings for a specific address
    pub fn for_address(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Default::default()
        }
    }

    /// Builder-style baud rate
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Builder-style read timeout
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Builder-style write timeout
    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// The address, or an error suitable for a failed open
    pub fn require_address(&self) -> Result<&str, TransportError> {
        self.address
            .as_deref()
            .ok_or_else(|| TransportError::InvalidSetting("no address configured".into()))
    }
}

/// Reject a baud rate the hardware cannot use
pub fn validate_baud_rate(baud_rate: u32) -> Result<u32, TransportError> {
    if baud_rate == 0 {
        return Err(TransportError::InvalidSetting(
            "baud rate must be positive".into(),
        ));
    }
    Ok(baud_rate)
}

/// Timeouts as fractional seconds, `null` meaning infinite
#[cfg(feature = "serde")]
mod secs {
    use std::time::Duration;

    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(d)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(D::Error::custom))
            .transpose()
    }
}
