//! Wire-level protocol errors.
//!
//! These cover malformed frames and unknown message types encountered while
//! decoding either framing (§4.H). They are narrower than the server-side
//! `SyncKitError` and are convertible into it.

use thiserror::Error;

/// Minimum valid binary frame length: 1 (type) + 8 (timestamp) + 4 (payload len).
pub const MIN_FRAME_LEN: usize = 13;

/// Errors produced while decoding a wire frame.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// The frame was shorter than [`MIN_FRAME_LEN`].
    #[error("frame too short: got {actual} bytes, need at least {MIN_FRAME_LEN}")]
    FrameTooShort {
        /// Bytes actually available.
        actual: usize,
    },

    /// The declared payload length did not match the bytes available.
    #[error("payload length mismatch: header declared {declared}, got {actual}")]
    PayloadLengthMismatch {
        /// Length declared in the frame header.
        declared: u32,
        /// Length actually present.
        actual: usize,
    },

    /// The single-byte type code did not match any known message type.
    #[error("unknown message type code: 0x{0:02X}")]
    UnknownMessageType(u8),

    /// The JSON payload did not parse, or did not match the shape expected
    /// for its message type.
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    /// An I/O error occurred while reading or writing a frame.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON-framed line exceeded the configured maximum length.
    #[error("JSON line exceeded maximum length")]
    LineTooLong,
}

impl ProtocolError {
    /// `true` if the connection must be closed (structural malformation,
    /// e.g. a truncated header) rather than merely logging and discarding
    /// the offending frame (§7: "closed with a ProtocolError reason").
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::FrameTooShort { .. }
                | Self::PayloadLengthMismatch { .. }
                | Self::Io(_)
                | Self::LineTooLong
        )
    }

    /// Static error code for metrics labeling.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::FrameTooShort { .. } => "frame_too_short",
            Self::PayloadLengthMismatch { .. } => "payload_length_mismatch",
            Self::UnknownMessageType(_) => "unknown_message_type",
            Self::MalformedPayload(_) => "malformed_payload",
            Self::Io(_) => "io_error",
            Self::LineTooLong => "line_too_long",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_errors_close_the_connection() {
        assert!(ProtocolError::FrameTooShort { actual: 3 }.is_structural());
        assert!(ProtocolError::PayloadLengthMismatch {
            declared: 10,
            actual: 2
        }
        .is_structural());
        assert!(!ProtocolError::UnknownMessageType(0x99).is_structural());
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(ProtocolError::UnknownMessageType(0x01).error_code(), "unknown_message_type");
    }
}
