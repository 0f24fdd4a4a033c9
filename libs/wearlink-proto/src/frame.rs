//! WearLink frame codec
//!
//! Frames are length-prefixed and checksummed:
//!
//! ```text
//! byte[0]              request id (0xAB host->device, 0x5A device->host)
//! byte[1]              total length == 4 + payload length
//! byte[2]              command id
//! byte[3..n-1]         payload
//! byte[n-1]            checksum over bytes [0..n-1)
//! ```
//!
//! The maximum frame length depends on the transport's negotiated MTU and is
//! passed in by the caller rather than baked in here.

use crate::error::FrameError;

/// Request id for frames sent host -> device
pub const HOST_REQUEST_ID: u8 = 0xAB;

/// Request id for frames sent device -> host
pub const DEVICE_RESPONSE_ID: u8 = 0x5A;

/// Bytes of framing around the payload: request id, length, command id, checksum
pub const FRAME_OVERHEAD: usize = 4;

/// Reflected CRC-8 over the given bytes, bit-exact with the device firmware.
///
/// Processes each byte least-significant bit first; on a feedback bit the
/// running value is XORed with 0x18, shifted right and the high bit set.
/// Check value over `"123456789"` is 0xA1.
pub fn checksum(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in data {
        let mut b = byte;
        for _ in 0..8 {
            if (b ^ crc) & 0x01 == 0 {
                crc >>= 1;
            } else {
                crc = ((crc ^ 0x18) >> 1) | 0x80;
            }
            b >>= 1;
        }
    }
    crc
}

/// A validated WearLink frame
///
/// Immutable once built: `encode` and `decode` are the only constructors, and
/// both enforce the length and checksum invariants. A buffer that fails
/// validation never becomes a `Frame`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    request_id: u8,
    command_id: u8,
    payload: Vec<u8>,
}

impl Frame {
    /// Build a frame and serialize it for transmission.
    ///
    /// Fails with `PayloadTooLarge` when the framed payload would exceed
    /// `max_frame_len` (the transport's negotiated capacity).
    pub fn encode(
        request_id: u8,
        command_id: u8,
        payload: &[u8],
        max_frame_len: usize,
    ) -> Result<Vec<u8>, FrameError> {
        let total = payload.len() + FRAME_OVERHEAD;
        if total > max_frame_len || total > u8::MAX as usize {
            return Err(FrameError::PayloadTooLarge {
                len: payload.len(),
                max: max_frame_len.min(u8::MAX as usize),
            });
        }

        let mut bytes = Vec::with_capacity(total);
        bytes.push(request_id);
        bytes.push(total as u8);
        bytes.push(command_id);
        bytes.extend_from_slice(payload);
        bytes.push(checksum(&bytes));
        Ok(bytes)
    }

    /// Parse and validate a received frame.
    pub fn decode(bytes: &[u8]) -> Result<Frame, FrameError> {
        if bytes.len() < FRAME_OVERHEAD {
            return Err(FrameError::FrameTooShort(bytes.len()));
        }

        let declared = bytes[1] as usize;
        if declared != bytes.len() {
            return Err(FrameError::LengthMismatch {
                declared,
                actual: bytes.len(),
            });
        }

        let computed = checksum(&bytes[..bytes.len() - 1]);
        let received = bytes[bytes.len() - 1];
        if computed != received {
            return Err(FrameError::ChecksumMismatch { computed, received });
        }

        Ok(Frame {
            request_id: bytes[0],
            command_id: bytes[2],
            payload: bytes[3..bytes.len() - 1].to_vec(),
        })
    }

    pub fn request_id(&self) -> u8 {
        self.request_id
    }

    pub fn command_id(&self) -> u8 {
        self.command_id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Total on-wire length of this frame
    pub fn total_length(&self) -> usize {
        self.payload.len() + FRAME_OVERHEAD
    }
}
