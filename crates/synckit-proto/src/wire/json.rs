//! JSON framing: newline-delimited JSON objects carrying the same taxonomy
//! as the binary framing (§4.H). Bit-compatible at the message level —
//! `decode_json(encode_json(m)) == m` for every message type, and a message
//! decoded from one framing equals the same message decoded from the other.

use crate::error::ProtocolError;

use super::message::Message;

/// Serialize a message to a single line of JSON (no trailing newline).
#[must_use]
pub fn encode_json(message: &Message) -> String {
    serde_json::to_string(message).expect("Message serialization cannot fail")
}

/// Parse one line of JSON back into a message.
pub fn decode_json(line: &str) -> Result<Message, ProtocolError> {
    Ok(serde_json::from_str(line.trim_end_matches(['\r', '\n']))?)
}

#[cfg(feature = "tokio")]
pub use streaming::JsonLineCodec;

#[cfg(feature = "tokio")]
mod streaming {
    use bytes::BytesMut;
    use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

    use super::{decode_json, encode_json};
    use crate::error::ProtocolError;
    use crate::wire::message::Message;

    /// Newline-delimited JSON codec, for the JSON framing over a
    /// `Framed<_, JsonLineCodec>` stream. Built on [`LinesCodec`], mirroring
    /// the line-oriented transport used elsewhere for text protocols.
    #[derive(Debug, Default)]
    pub struct JsonLineCodec {
        lines: LinesCodec,
    }

    impl JsonLineCodec {
        /// Build a fresh codec.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl From<LinesCodecError> for ProtocolError {
        fn from(e: LinesCodecError) -> Self {
            match e {
                LinesCodecError::MaxLineLengthExceeded => ProtocolError::LineTooLong,
                LinesCodecError::Io(io) => ProtocolError::Io(io),
            }
        }
    }

    impl Decoder for JsonLineCodec {
        type Item = Message;
        type Error = ProtocolError;

        fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, ProtocolError> {
            match self.lines.decode(src)? {
                Some(line) => decode_json(&line).map(Some),
                None => Ok(None),
            }
        }
    }

    impl Encoder<Message> for JsonLineCodec {
        type Error = ProtocolError;

        fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), ProtocolError> {
            let line = encode_json(&item);
            self.lines.encode(line, dst).map_err(ProtocolError::from)
        }
    }

}
