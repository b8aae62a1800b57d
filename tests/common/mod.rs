//! Shared helper for the end-to-end scenario tests: round-trip a CRDT
//! operation through the real binary wire framing the way a `Delta` message
//! travels between two live replicas.

use synckit_crdt::Operation;
use synckit_proto::wire::binary;
use synckit_proto::Message;

/// Encode `op` as a `Delta` message over the binary wire framing, decode it
/// back, and return the reconstructed operation. Exercises the same
/// encode/decode path a real connection uses rather than passing the struct
/// directly from replica to replica in memory.
pub fn wire_roundtrip(op: &Operation) -> Operation {
    let message = Message::Delta {
        document_id: op.document_id.clone(),
        delta: serde_json::to_value(op).expect("Operation serializes"),
        vector_clock: op.vector_clock.to_wire(),
    };
    let bytes = binary::encode(&message);
    let frame = binary::decode(&bytes).expect("frame decodes");
    match frame.message {
        Message::Delta { delta, .. } => serde_json::from_value(delta).expect("Operation deserializes"),
        other => panic!("expected Delta, got {other:?}"),
    }
}
