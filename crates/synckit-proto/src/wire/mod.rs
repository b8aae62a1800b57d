//! The client↔server wire protocol (§4.H): message taxonomy plus binary and
//! JSON framings over it.

pub mod binary;
pub mod json;
pub mod message;

pub use message::{AwarenessEntryWire, DeltaEnvelope, Message};

#[cfg(feature = "tokio")]
pub use binary::FrameCodec;
pub use binary::Frame;
