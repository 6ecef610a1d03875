//! Delimiter framing
//!
//! [`FramedReader`] pulls one byte at a time from a [`Transport`] until the
//! accumulated bytes end with a terminator, a size cap is reached, the read
//! deadline closes, or the device goes away. Reading byte-wise never
//! consumes anything past the terminator, so the next frame starts exactly
//! where this one ended.
//!
//! Running out of time is not an error. The frame comes back with whatever
//! arrived and [`FrameEnd::TimedOut`]; callers that only look at the bytes
//! can still tell a complete frame by checking its tail. A close from
//! another thread mid-frame likewise hands back the partial bytes, marked
//! [`FrameEnd::Closed`].

use crate::deadline::Deadline;
use crate::error::TransportError;
use crate::transport::Transport;

/// Terminator used by `read_line`
pub const DEFAULT_TERMINATOR: &[u8] = b"\n";

/// Why a frame ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEnd {
    /// The bytes end with the terminator
    Terminator,
    /// The size cap was reached first
    SizeLimit,
    /// The read deadline closed first (bytes may be empty)
    TimedOut,
    /// The device went away; the transport is now closed
    Disconnected,
    /// The transport was closed by another thread (bytes may be empty)
    Closed,
}

/// Bytes read by one framing call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
    end: FrameEnd,
}

impl Frame {
    pub fn new(bytes: Vec<u8>, end: FrameEnd) -> Self {
        Self { bytes, end }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn end(&self) -> FrameEnd {
        self.end
    }

    /// Ended on the terminator or the size cap
    pub fn is_complete(&self) -> bool {
        matches!(self.end, FrameEnd::Terminator | FrameEnd::SizeLimit)
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

/// Reads terminator-delimited frames from a transport
#[derive(Debug)]
pub struct FramedReader<'a> {
    transport: &'a Transport,
    terminator: &'a [u8],
    max_len: Option<usize>,
}

impl<'a> FramedReader<'a> {
    /// Frame on `terminator`; an empty terminator never matches
    pub fn new(transport: &'a Transport, terminator: &'a [u8]) -> Self {
        Self {
            transport,
            terminator,
            max_len: None,
        }
    }

    /// Cap frames at `max_len` bytes
    pub fn max_len(mut self, max_len: Option<usize>) -> Self {
        self.max_len = max_len;
        self
    }

    fn at_terminator(&self, line: &[u8]) -> bool {
        !self.terminator.is_empty() && line.ends_with(self.terminator)
    }

    fn at_limit(&self, line: &[u8]) -> bool {
        self.max_len.is_some_and(|max| line.len() >= max)
    }

    /// Read the next frame
    ///
    /// The whole call is bounded by one read timeout of the transport. It
    /// fails only if the transport is closed when called.
    pub fn next_frame(&self) -> Result<Frame, TransportError> {
        if !self.transport.is_open() {
            return Err(TransportError::NotOpen);
        }

        let mut line = Vec::new();
        if self.at_limit(&line) {
            return Ok(Frame::new(line, FrameEnd::SizeLimit));
        }

        let mut deadline = Deadline::new(self.transport.read_timeout());
        loop {
            match self.transport.read_within(1, &mut deadline) {
                Ok(byte) if byte.is_empty() => {
                    return Ok(Frame::new(line, FrameEnd::TimedOut));
                }
                Ok(byte) => {
                    line.extend_from_slice(&byte);
                    if self.at_terminator(&line) {
                        return Ok(Frame::new(line, FrameEnd::Terminator));
                    }
                    if self.at_limit(&line) {
                        return Ok(Frame::new(line, FrameEnd::SizeLimit));
                    }
                }
                Err(TransportError::Disconnected { partial, .. }) => {
                    line.extend_from_slice(&partial);
                    return Ok(Frame::new(line, FrameEnd::Disconnected));
                }
                Err(TransportError::NotOpen) => {
                    return Ok(Frame::new(line, FrameEnd::Closed));
                }
                Err(e) => return Err(e),
            }

            if deadline.expired() {
                return Ok(Frame::new(line, FrameEnd::TimedOut));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_accessors() {
        let frame = Frame::new(b"ab}".to_vec(), FrameEnd::Terminator);
        assert!(frame.is_complete());
        assert_eq!(frame.len(), 3);
        assert_eq!(frame.as_ref(), b"ab}");
        assert_eq!(frame.into_bytes(), b"ab}".to_vec());

        let partial = Frame::new(Vec::new(), FrameEnd::TimedOut);
        assert!(!partial.is_complete());
        assert!(partial.is_empty());
    }

    #[test]
    fn test_matching_rules() {
        let transport = Transport::serial(Default::default());
        let reader = FramedReader::new(&transport, b"\r\n").max_len(Some(4));

        assert!(reader.at_terminator(b"ok\r\n"));
        assert!(!reader.at_terminator(b"ok\r"));
        assert!(reader.at_limit(b"abcd"));
        assert!(!reader.at_limit(b"abc"));

        let no_terminator = FramedReader::new(&transport, b"");
        assert!(!no_terminator.at_terminator(b"anything"));
        assert!(!no_terminator.at_limit(b"anything"));
    }

    #[test]
    fn test_closed_transport() {
        let transport = Transport::serial(Default::default());
        let reader = FramedReader::new(&transport, b"}");
        assert!(matches!(reader.next_frame(), Err(TransportError::NotOpen)));
    }
}
