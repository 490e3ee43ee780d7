use std::collections::BTreeMap;

use assert_matches::assert_matches;
use serde_json::{json, Map};

use crate::fact::{FactRecord, FactReference, PredecessorCollection};
use crate::graph::{sort_topologically, GraphError};

fn single(reference: FactReference) -> PredecessorCollection {
    PredecessorCollection::Single(reference)
}

fn fact(fact_type: &str, predecessors: BTreeMap<String, PredecessorCollection>) -> FactRecord {
    let mut fields = Map::new();
    fields.insert("id".to_string(), json!(fact_type));
    FactRecord::new(fact_type, fields, predecessors)
}

#[test]
fn predecessors_come_before_successors() {
    let store = fact("Store", BTreeMap::new());
    let order = fact(
        "Order",
        BTreeMap::from([("store".to_string(), single(store.reference()))]),
    );
    let item = fact(
        "Item",
        BTreeMap::from([("order".to_string(), single(order.reference()))]),
    );

    // Deliberately submitted successor-first.
    let batch = sort_topologically(vec![item.clone(), order.clone(), store.clone()]).unwrap();

    let types: Vec<&str> = batch.facts.iter().map(|f| f.fact_type.as_str()).collect();
    assert_eq!(types, vec!["Store", "Order", "Item"]);
    assert!(batch.external.is_empty());
}

#[test]
fn references_outside_the_batch_are_reported() {
    let store = fact("Store", BTreeMap::new());
    let order = fact(
        "Order",
        BTreeMap::from([("store".to_string(), single(store.reference()))]),
    );

    let batch = sort_topologically(vec![order]).unwrap();
    assert_eq!(batch.external, vec![store.reference()]);
}

#[test]
fn a_crafted_cycle_is_rejected() {
    // Hand-built records with forged hashes; impossible to produce through
    // hashing, but accepted off the wire.
    let a = FactRecord {
        fact_type: "A".to_string(),
        hash: "ha".to_string(),
        fields: Map::new(),
        predecessors: BTreeMap::from([(
            "prior".to_string(),
            single(FactReference::new("B", "hb")),
        )]),
    };
    let b = FactRecord {
        fact_type: "B".to_string(),
        hash: "hb".to_string(),
        fields: Map::new(),
        predecessors: BTreeMap::from([(
            "prior".to_string(),
            single(FactReference::new("A", "ha")),
        )]),
    };

    assert_matches!(sort_topologically(vec![a, b]), Err(GraphError::Cycle(_)));
}

#[test]
fn duplicate_external_references_are_deduplicated() {
    let store = fact("Store", BTreeMap::new());
    let order_a = fact(
        "OrderA",
        BTreeMap::from([("store".to_string(), single(store.reference()))]),
    );
    let order_b = fact(
        "OrderB",
        BTreeMap::from([("store".to_string(), single(store.reference()))]),
    );

    let batch = sort_topologically(vec![order_a, order_b]).unwrap();
    assert_eq!(batch.external, vec![store.reference()]);
}
