//! Command/response framing for the link protocol.
//!
//! Frames are packed little-endian. A command carries a 4-byte header
//! (id, sequence, 16-bit payload length) and a response a 5-byte header
//! (id, status, sequence, 16-bit payload length). Every dispatch builds its
//! response in an owned [`ResponseBuilder`] that is consumed by the link
//! send call; nothing is shared between requests.

extern crate alloc;
use alloc::vec::Vec;

use thiserror_no_std::Error;

/// Fixed command-frame header length.
pub const COMMAND_HEADER_LEN: usize = 4;
/// Fixed response-frame header length.
pub const RESPONSE_HEADER_LEN: usize = 5;
/// Upper bound on a response payload; handlers must fit inside it.
pub const RESPONSE_DATA_CAPACITY: usize = 256;

/// Response status taxonomy. Values are part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StatusCode {
    Success = 0x00,
    Error = 0x01,
    InvalidCommand = 0x02,
    InvalidParameter = 0x03,
    Busy = 0x04,
    NotSupported = 0x05,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame shorter than its fixed header")]
    TooShort,
    #[error("length field disagrees with received byte count")]
    LengthMismatch,
    #[error("payload exceeds the response buffer")]
    Overflow,
}

/// A parsed command frame, borrowing its payload from the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame<'a> {
    pub command_id: u8,
    pub sequence: u8,
    pub data: &'a [u8],
}

impl<'a> CommandFrame<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, FrameError> {
        if bytes.len() < COMMAND_HEADER_LEN {
            return Err(FrameError::TooShort);
        }
        let declared = u16::from_le_bytes([bytes[2], bytes[3]]) as usize;
        if bytes.len() - COMMAND_HEADER_LEN != declared {
            return Err(FrameError::LengthMismatch);
        }
        Ok(Self {
            command_id: bytes[0],
            sequence: bytes[1],
            data: &bytes[COMMAND_HEADER_LEN..],
        })
    }

    /// Encode a command frame; used by tests and host-side tooling.
    pub fn encode(command_id: u8, sequence: u8, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(COMMAND_HEADER_LEN + data.len());
        out.push(command_id);
        out.push(sequence);
        out.extend_from_slice(&(data.len() as u16).to_le_bytes());
        out.extend_from_slice(data);
        out
    }
}

/// Owned per-request response builder.
///
/// Constructed at dispatch entry, filled by the handler, consumed by
/// [`finish`]. The payload is bounded by [`RESPONSE_DATA_CAPACITY`]; a
/// handler overrunning it is a bug and surfaces as [`FrameError::Overflow`].
///
/// [`finish`]: Self::finish
#[derive(Debug)]
pub struct ResponseBuilder {
    response_id: u8,
    sequence: u8,
    status: StatusCode,
    data: heapless::Vec<u8, RESPONSE_DATA_CAPACITY>,
}

impl ResponseBuilder {
    /// Start a response answering `command_id` with status `Success`.
    pub fn new(command_id: u8, sequence: u8) -> Self {
        Self {
            response_id: command_id,
            sequence,
            status: StatusCode::Success,
            data: heapless::Vec::new(),
        }
    }

    /// Start an empty response with the given status.
    pub fn status_only(command_id: u8, sequence: u8, status: StatusCode) -> Self {
        let mut builder = Self::new(command_id, sequence);
        builder.status = status;
        builder
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<(), FrameError> {
        self.data
            .extend_from_slice(bytes)
            .map_err(|_| FrameError::Overflow)
    }

    /// Serialise header plus payload into the frame handed to the link.
    pub fn finish(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(RESPONSE_HEADER_LEN + self.data.len());
        out.push(self.response_id);
        out.push(self.status as u8);
        out.push(self.sequence);
        out.extend_from_slice(&(self.data.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.data);
        out
    }
}

/// A parsed response frame; the device never parses these itself, but the
/// simulator and the tests do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseFrame<'a> {
    pub response_id: u8,
    pub status: u8,
    pub sequence: u8,
    pub data: &'a [u8],
}

impl<'a> ResponseFrame<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, FrameError> {
        if bytes.len() < RESPONSE_HEADER_LEN {
            return Err(FrameError::TooShort);
        }
        let declared = u16::from_le_bytes([bytes[3], bytes[4]]) as usize;
        if bytes.len() - RESPONSE_HEADER_LEN != declared {
            return Err(FrameError::LengthMismatch);
        }
        Ok(Self {
            response_id: bytes[0],
            status: bytes[1],
            sequence: bytes[2],
            data: &bytes[RESPONSE_HEADER_LEN..],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_parse_round_trip() {
        let encoded = CommandFrame::encode(0x01, 7, &[0xaa, 0xbb]);
        let frame = CommandFrame::parse(&encoded).unwrap();
        assert_eq!(frame.command_id, 0x01);
        assert_eq!(frame.sequence, 7);
        assert_eq!(frame.data, &[0xaa, 0xbb]);
    }

    #[test]
    fn test_command_parse_rejects_short_frames() {
        assert_eq!(CommandFrame::parse(&[]), Err(FrameError::TooShort));
        assert_eq!(CommandFrame::parse(&[0x01, 0x02, 0x00]), Err(FrameError::TooShort));
    }

    #[test]
    fn test_command_parse_rejects_length_disagreement() {
        // Declares 2 payload bytes but carries 1.
        assert_eq!(
            CommandFrame::parse(&[0x01, 0x00, 0x02, 0x00, 0xaa]),
            Err(FrameError::LengthMismatch)
        );
        // Declares 0 but carries 1.
        assert_eq!(
            CommandFrame::parse(&[0x01, 0x00, 0x00, 0x00, 0xaa]),
            Err(FrameError::LengthMismatch)
        );
    }

    #[test]
    fn test_response_builder_layout() {
        let mut builder = ResponseBuilder::new(0x01, 7);
        builder.write(&[1, 2, 3]).unwrap();
        let frame = builder.finish();
        assert_eq!(frame, &[0x01, 0x00, 7, 3, 0, 1, 2, 3]);

        let parsed = ResponseFrame::parse(&frame).unwrap();
        assert_eq!(parsed.response_id, 0x01);
        assert_eq!(parsed.status, StatusCode::Success as u8);
        assert_eq!(parsed.sequence, 7);
        assert_eq!(parsed.data, &[1, 2, 3]);
    }

    #[test]
    fn test_response_builder_overflow() {
        let mut builder = ResponseBuilder::new(0x01, 0);
        let big = [0u8; RESPONSE_DATA_CAPACITY];
        builder.write(&big).unwrap();
        assert_eq!(builder.write(&[0]), Err(FrameError::Overflow));
    }

    #[test]
    fn test_status_only_response() {
        let frame = ResponseBuilder::status_only(0xff, 3, StatusCode::InvalidCommand).finish();
        assert_eq!(frame, &[0xff, 0x02, 3, 0, 0]);
    }
}
