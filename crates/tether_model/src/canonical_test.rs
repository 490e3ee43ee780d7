use std::collections::BTreeMap;

use pretty_assertions::assert_eq;
use serde_json::{json, Map, Value};

use crate::canonical::{canonical_form, hash_canonical};
use crate::fact::{FactReference, PredecessorCollection};

fn fields_of(value: Value) -> Map<String, Value> {
    value.as_object().unwrap().clone()
}

#[test]
fn fields_are_sorted_by_key() {
    let fields = fields_of(json!({ "zeta": 1, "alpha": "x" }));
    let canonical = canonical_form(&fields, &BTreeMap::new());
    assert_eq!(canonical, r#"{"fields":{"alpha":"x","zeta":1},"predecessors":{}}"#);
}

#[test]
fn references_are_sorted_by_type_then_hash() {
    let mut predecessors = BTreeMap::new();
    predecessors.insert(
        "prior".to_string(),
        PredecessorCollection::Multiple(vec![
            FactReference::new("B.Type", "h1"),
            FactReference::new("A.Type", "h2"),
            FactReference::new("A.Type", "h1"),
        ]),
    );
    let canonical = canonical_form(&Map::new(), &predecessors);
    assert_eq!(
        canonical,
        concat!(
            r#"{"fields":{},"predecessors":{"prior":["#,
            r#"{"hash":"h1","type":"A.Type"},"#,
            r#"{"hash":"h2","type":"A.Type"},"#,
            r#"{"hash":"h1","type":"B.Type"}"#,
            r#"]}}"#
        )
    );
}

#[test]
fn single_reference_is_not_wrapped_in_an_array() {
    let mut predecessors = BTreeMap::new();
    predecessors.insert(
        "store".to_string(),
        PredecessorCollection::Single(FactReference::new("Store", "abc")),
    );
    let canonical = canonical_form(&Map::new(), &predecessors);
    assert_eq!(
        canonical,
        r#"{"fields":{},"predecessors":{"store":{"hash":"abc","type":"Store"}}}"#
    );
}

#[test]
fn string_escapes_survive_canonicalization() {
    let fields = fields_of(json!({ "note": "line\nbreak \"quoted\"" }));
    let canonical = canonical_form(&fields, &BTreeMap::new());
    assert_eq!(
        canonical,
        r#"{"fields":{"note":"line\nbreak \"quoted\""},"predecessors":{}}"#
    );
}

#[test]
fn identical_content_hashes_identically() {
    let fields = fields_of(json!({ "name": "storeId", "count": 3 }));
    let a = hash_canonical(&canonical_form(&fields, &BTreeMap::new()));
    let b = hash_canonical(&canonical_form(&fields, &BTreeMap::new()));
    assert_eq!(a, b);
}

#[test]
fn different_content_hashes_differently() {
    let a = hash_canonical(&canonical_form(&fields_of(json!({ "n": 1 })), &BTreeMap::new()));
    let b = hash_canonical(&canonical_form(&fields_of(json!({ "n": 2 })), &BTreeMap::new()));
    assert_ne!(a, b);
}
