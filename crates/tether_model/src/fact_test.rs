use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::fact::{
    FactEnvelope,
    FactRecord,
    FactReference,
    FactSignature,
    PredecessorCollection,
};

pub fn fields_of(value: Value) -> Map<String, Value> {
    value.as_object().unwrap().clone()
}

fn store_fact() -> FactRecord {
    FactRecord::new("Store", fields_of(json!({ "identifier": "storeId" })), BTreeMap::new())
}

#[test]
fn new_record_carries_a_verifiable_hash() {
    let fact = store_fact();
    assert!(fact.verify_hash());
    assert_eq!(fact.hash, fact.compute_hash());
}

#[test]
fn tampered_fields_fail_verification() {
    let mut fact = store_fact();
    fact.fields.insert("identifier".to_string(), json!("other"));
    assert!(!fact.verify_hash());
}

#[test]
fn predecessor_references_cover_all_roles() {
    let store = store_fact();
    let mut predecessors = BTreeMap::new();
    predecessors.insert("store".to_string(), PredecessorCollection::Single(store.reference()));
    predecessors.insert(
        "items".to_string(),
        PredecessorCollection::Multiple(vec![
            FactReference::new("Item", "i1"),
            FactReference::new("Item", "i2"),
        ]),
    );
    let order = FactRecord::new("Order", Map::new(), predecessors);

    let references = order.predecessor_references();
    assert_eq!(references.len(), 3);
    assert!(references.contains(&store.reference()));
}

#[test]
fn sanitize_drops_signatures_of_a_mismatched_hash() {
    let mut fact = store_fact();
    fact.hash = "forged".to_string();
    let envelope = FactEnvelope {
        fact,
        signatures: vec![FactSignature {
            public_key: "-----BEGIN PUBLIC KEY-----".to_string(),
            signature: "c2ln".to_string(),
        }],
    };

    let sanitized = envelope.sanitized();
    assert!(sanitized.signatures.is_empty());
}

#[test]
fn sanitize_keeps_signatures_of_a_valid_hash() {
    let envelope = FactEnvelope {
        fact: store_fact(),
        signatures: vec![FactSignature {
            public_key: "-----BEGIN PUBLIC KEY-----".to_string(),
            signature: "c2ln".to_string(),
        }],
    };

    let sanitized = envelope.sanitized();
    assert_eq!(sanitized.signatures.len(), 1);
}

#[test]
fn wire_format_uses_type_and_untagged_predecessors() {
    let store = store_fact();
    let mut predecessors = BTreeMap::new();
    predecessors.insert("store".to_string(), PredecessorCollection::Single(store.reference()));
    let order = FactRecord::new("Order", Map::new(), predecessors);

    let wire = serde_json::to_value(&order).unwrap();
    assert_eq!(wire["type"], json!("Order"));
    assert_eq!(wire["predecessors"]["store"]["type"], json!("Store"));

    let parsed: FactRecord = serde_json::from_value(wire).unwrap();
    assert_eq!(parsed, order);
}
