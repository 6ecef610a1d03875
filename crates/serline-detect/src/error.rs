//! Error types for port detection

use thiserror::Error;

/// Errors that can occur while listing ports
#[derive(Debug, Error)]
pub enum DetectError {
    /// The OS could not list its serial ports
    #[error("failed to enumerate ports: {0}")]
    Enumeration(#[from] serialport::Error),
}
