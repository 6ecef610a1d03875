//! Background receive loop
//!
//! Drains a shared transport on its own thread and forwards what it reads
//! over a channel, while the owner keeps writing from the foreground. The
//! loop checks its cancellation token once per read, so stopping it takes
//! at most one read timeout.

use std::io;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::framed::{Frame, FrameEnd};
use crate::transport::Transport;

/// Pause between empty polls when the read timeout is non-blocking
const IDLE_BACKOFF: Duration = Duration::from_millis(10);

/// What the receive loop reads each iteration
#[derive(Debug, Clone)]
pub enum ReceiveMode {
    /// One `read_until` per iteration
    Frames {
        terminator: Vec<u8>,
        max_len: Option<usize>,
    },
    /// One `read(max_len)` per iteration
    Chunks { max_len: usize },
}

impl ReceiveMode {
    /// Newline-terminated frames without a size cap
    pub fn lines() -> Self {
        Self::Frames {
            terminator: b"\n".to_vec(),
            max_len: None,
        }
    }
}

/// Delivered to the consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveEvent {
    /// A frame (complete, or partial after a quiet read timeout)
    Frame(Frame),
    /// Raw bytes in chunk mode
    Data(Vec<u8>),
    /// The device went away
    Disconnected { address: String },
    /// The transport failed in some other way
    Failed(String),
}

/// Why the receive loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverExit {
    /// The token was cancelled
    Cancelled,
    /// The device disconnected
    Disconnected,
    /// The transport was closed by its owner
    Closed,
    /// The event receiver was dropped
    ConsumerGone,
    /// A non-recoverable transport error
    Failed,
}

/// Start the receive loop on a named thread
pub fn spawn_receiver(
    transport: Arc<Transport>,
    mode: ReceiveMode,
    events: Sender<ReceiveEvent>,
    stop: CancellationToken,
) -> io::Result<JoinHandle<ReceiverExit>> {
    thread::Builder::new()
        .name("serline-rx".into())
        .spawn(move || run_receiver(&transport, &mode, &events, &stop))
}

/// Run the receive loop on the current thread until it ends
pub fn run_receiver(
    transport: &Transport,
    mode: &ReceiveMode,
    events: &Sender<ReceiveEvent>,
    stop: &CancellationToken,
) -> ReceiverExit {
    debug!("Receiver started");
    let exit = receive_until_done(transport, mode, events, stop);
    debug!("Receiver stopped: {:?}", exit);
    exit
}

fn receive_until_done(
    transport: &Transport,
    mode: &ReceiveMode,
    events: &Sender<ReceiveEvent>,
    stop: &CancellationToken,
) -> ReceiverExit {
    let address = transport.address().unwrap_or_default();

    while !stop.is_cancelled() {
        let (event, disconnected) = match read_once(transport, mode) {
            Ok(Some(step)) => step,
            Ok(None) => {
                if transport.read_timeout() == Some(Duration::ZERO) {
                    thread::sleep(IDLE_BACKOFF);
                }
                continue;
            }
            Err(TransportError::NotOpen) => return ReceiverExit::Closed,
            Err(e) => {
                warn!("Receiver failed: {}", e);
                let _ = events.send(ReceiveEvent::Failed(e.to_string()));
                return ReceiverExit::Failed;
            }
        };

        if let Some(event) = event {
            if events.send(event).is_err() {
                return ReceiverExit::ConsumerGone;
            }
        }
        if disconnected {
            let _ = events.send(ReceiveEvent::Disconnected { address });
            return ReceiverExit::Disconnected;
        }
    }
    ReceiverExit::Cancelled
}

type Step = (Option<ReceiveEvent>, bool);

// One read. `Ok(None)` means nothing arrived before the timeout.
fn read_once(transport: &Transport, mode: &ReceiveMode) -> Result<Option<Step>, TransportError> {
    match mode {
        ReceiveMode::Frames {
            terminator,
            max_len,
        } => {
            let frame = transport.read_until(terminator, *max_len)?;
            let disconnected = frame.end() == FrameEnd::Disconnected;
            if frame.is_empty() && frame.end() == FrameEnd::Closed {
                return Err(TransportError::NotOpen);
            }
            if frame.is_empty() {
                return Ok(disconnected.then_some((None, true)));
            }
            Ok(Some((Some(ReceiveEvent::Frame(frame)), disconnected)))
        }
        ReceiveMode::Chunks { max_len } => match transport.read(*max_len) {
            Ok(data) if data.is_empty() => Ok(None),
            Ok(data) => Ok(Some((Some(ReceiveEvent::Data(data)), false))),
            Err(TransportError::Disconnected { partial, .. }) => {
                let event = (!partial.is_empty()).then_some(ReceiveEvent::Data(partial));
                Ok(Some((event, true)))
            }
            Err(e) => Err(e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::PortSettings;
    use std::sync::mpsc;

    #[test]
    fn test_closed_transport_ends_loop() {
        let transport = Arc::new(Transport::serial(PortSettings::default()));
        let (tx, rx) = mpsc::channel();
        let stop = CancellationToken::new();

        let handle = spawn_receiver(transport, ReceiveMode::lines(), tx, stop).unwrap();

        assert_eq!(handle.join().unwrap(), ReceiverExit::Closed);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_cancelled_before_start() {
        let transport = Transport::serial(PortSettings::default());
        let (tx, _rx) = mpsc::channel();
        let stop = CancellationToken::new();
        stop.cancel();

        let exit = run_receiver(&transport, &ReceiveMode::lines(), &tx, &stop);
        assert_eq!(exit, ReceiverExit::Cancelled);
    }
}
