//! Binary framing: `type(1B) | timestamp(i64 BE) | payloadLen(u32 BE) | payload(UTF-8 JSON)`.
//!
//! This is the authoritative framing for interop (§4.H); the JSON framing in
//! [`super::json`] carries the same taxonomy for testing.

use crate::clock::PhysicalTime;
use crate::error::ProtocolError;

use super::message::Message;

const TYPE_LEN: usize = 1;
const TIMESTAMP_LEN: usize = 8;
const LEN_LEN: usize = 4;
const HEADER_LEN: usize = TYPE_LEN + TIMESTAMP_LEN + LEN_LEN;

/// A decoded binary frame: the message plus the timestamp carried in its header.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// The decoded message.
    pub message: Message,
    /// The wall-clock timestamp carried in the frame header.
    pub timestamp: PhysicalTime,
}

/// Encode a message into a binary frame using the current wall-clock time.
#[must_use]
pub fn encode(message: &Message) -> Vec<u8> {
    encode_at(message, PhysicalTime::now())
}

/// Encode a message into a binary frame with an explicit timestamp.
///
/// Exposed separately from [`encode`] so tests can produce deterministic
/// frames without depending on wall-clock time.
#[must_use]
pub fn encode_at(message: &Message, timestamp: PhysicalTime) -> Vec<u8> {
    let payload = serde_json::to_vec(message).expect("Message serialization cannot fail");
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.push(message.type_code());
    buf.extend_from_slice(&timestamp.millis().to_be_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&payload);
    buf
}

/// Decode a single binary frame from `bytes`.
///
/// `bytes` must contain exactly one frame (header + declared payload length);
/// use [`FrameCodec`] for streaming decode over a byte stream that may
/// contain partial or multiple frames.
pub fn decode(bytes: &[u8]) -> Result<Frame, ProtocolError> {
    if bytes.len() < HEADER_LEN {
        return Err(ProtocolError::FrameTooShort { actual: bytes.len() });
    }

    let type_code = bytes[0];
    let millis = i64::from_be_bytes(bytes[1..9].try_into().expect("8 bytes"));
    let declared_len = u32::from_be_bytes(bytes[9..13].try_into().expect("4 bytes"));

    let payload = &bytes[HEADER_LEN..];
    if payload.len() as u32 != declared_len {
        return Err(ProtocolError::PayloadLengthMismatch {
            declared: declared_len,
            actual: payload.len(),
        });
    }

    let message: Message = serde_json::from_slice(payload)?;
    message.validate_type_code(type_code)?;

    Ok(Frame {
        message,
        timestamp: PhysicalTime::from_millis(millis),
    })
}

#[cfg(feature = "tokio")]
pub use streaming::FrameCodec;

#[cfg(feature = "tokio")]
mod streaming {
    use bytes::{Buf, BytesMut};
    use tokio_util::codec::{Decoder, Encoder};

    use super::{decode, Frame, HEADER_LEN};
    use crate::clock::PhysicalTime;
    use crate::error::ProtocolError;
    use crate::wire::message::Message;

    /// A [`tokio_util::codec::Decoder`]/[`Encoder`] pair for the binary framing,
    /// suitable for wrapping a `TcpStream` in a `Framed<_, FrameCodec>`.
    #[derive(Debug, Default)]
    pub struct FrameCodec {
        declared_len: Option<u32>,
    }

    impl FrameCodec {
        /// Build a fresh codec with no in-progress frame.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl Decoder for FrameCodec {
        type Item = Frame;
        type Error = ProtocolError;

        fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
            if self.declared_len.is_none() {
                if src.len() < HEADER_LEN {
                    return Ok(None);
                }
                let len = u32::from_be_bytes(src[9..13].try_into().expect("4 bytes"));
                self.declared_len = Some(len);
            }

            let declared = self.declared_len.expect("set above");
            let total = HEADER_LEN + declared as usize;
            if src.len() < total {
                return Ok(None);
            }

            let frame_bytes = src.split_to(total);
            self.declared_len = None;
            decode(&frame_bytes).map(Some)
        }
    }

    impl Encoder<Message> for FrameCodec {
        type Error = ProtocolError;

        fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), ProtocolError> {
            let bytes = super::encode_at(&item, PhysicalTime::now());
            dst.reserve(bytes.len());
            dst.extend_from_slice(&bytes);
            Ok(())
        }
    }

    impl Encoder<Frame> for FrameCodec {
        type Error = ProtocolError;

        fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), ProtocolError> {
            let bytes = super::encode_at(&item.message, item.timestamp);
            dst.reserve(bytes.len());
            dst.extend_from_slice(&bytes);
            Ok(())
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let msg = Message::Subscribe { document_id: "doc1".into() };
        let ts = PhysicalTime::from_millis(1_700_000_000_000);
        let bytes = encode_at(&msg, ts);

        assert!(bytes.len() >= HEADER_LEN);

        let frame = decode(&bytes).unwrap();
        assert_eq!(frame.message, msg);
        assert_eq!(frame.timestamp, ts);
    }

    #[test]
    fn short_frames_are_rejected() {
        let err = decode(&[0x30, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooShort { .. }));
    }

    #[test]
    fn payload_length_mismatch_is_rejected() {
        let msg = Message::Ping {};
        let mut bytes = encode_at(&msg, PhysicalTime::from_millis(0));
        // Corrupt the declared length to be larger than the actual payload.
        let bad_len = (bytes.len() as u32 - HEADER_LEN as u32) + 5;
        bytes[9..13].copy_from_slice(&bad_len.to_be_bytes());

        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, ProtocolError::PayloadLengthMismatch { .. }));
    }

    #[test]
    fn minimum_frame_is_thirteen_bytes() {
        assert_eq!(HEADER_LEN, 13);
    }
}
