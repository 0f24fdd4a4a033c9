//! Protocol error types
//!
//! Frame-level and command-level failures are kept separate: a `FrameError`
//! means the byte buffer never was a valid frame, a `CommandError` means a
//! valid frame carried a payload that violates a command's contract. Both
//! are fatal to the single frame only, never to the connection.

use thiserror::Error;

/// Frame codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Payload would not fit in the negotiated maximum frame length
    #[error("payload too large: {len} bytes + overhead exceeds max frame length {max}")]
    PayloadTooLarge { len: usize, max: usize },

    /// Fewer bytes than the minimum frame header
    #[error("frame too short: {0} bytes")]
    FrameTooShort(usize),

    /// Declared total length disagrees with the buffer length
    #[error("frame length mismatch: declared {declared}, buffer holds {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// Trailing checksum byte does not match the computed checksum
    #[error("checksum mismatch: computed 0x{computed:02X}, received 0x{received:02X}")]
    ChecksumMismatch { computed: u8, received: u8 },
}

/// Command model errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Frame carried a command id this protocol family does not define
    #[error("unexpected command id 0x{0:02X}")]
    UnexpectedCommandId(u8),

    /// Payload length differs from the exact contract for this command
    #[error("unexpected payload length for command 0x{command_id:02X}: expected {expected}, got {actual}")]
    UnexpectedPayloadLength {
        command_id: u8,
        expected: usize,
        actual: usize,
    },

    /// Operation byte is neither GET nor SET
    #[error("unknown operation byte 0x{0:02X}")]
    UnknownOperation(u8),

    /// A field value failed its domain check at construction
    #[error("{field} out of range: {value} (allowed {min}..={max})")]
    FieldOutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },
}
