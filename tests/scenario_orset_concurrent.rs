//! S4: a concurrent add and a remove-of-an-unseen-tag converge with the
//! add winning, once both operations cross the wire to a third replica.

mod common;

use synckit_crdt::OrSet;
use synckit_proto::ReplicaId;

#[test]
fn concurrent_add_and_remove_of_unseen_tag_converges_to_present() {
    let mut replica_a: OrSet<String> = OrSet::new("doc1", ReplicaId::new("a"));
    let add_op = replica_a.add("apple".to_string());

    let mut replica_b: OrSet<String> = OrSet::new("doc1", ReplicaId::new("b"));
    // b never observed a's add, so its remove tombstones zero tags.
    let remove_op = replica_b.remove(&"apple".to_string());

    let mut merged: OrSet<String> = OrSet::new("doc1", ReplicaId::new("c"));
    merged.apply_remote(&common::wire_roundtrip(&add_op));
    merged.apply_remote(&common::wire_roundtrip(&remove_op));

    assert!(merged.has(&"apple".to_string()), "add-wins: remove only tombstones tags it actually observed");

    // Order of arrival must not matter.
    let mut merged_reordered: OrSet<String> = OrSet::new("doc1", ReplicaId::new("d"));
    merged_reordered.apply_remote(&common::wire_roundtrip(&remove_op));
    merged_reordered.apply_remote(&common::wire_roundtrip(&add_op));
    assert!(merged_reordered.has(&"apple".to_string()));
}
