//! Deterministic byte encoding of a fact's identity-bearing content.
//!
//! Two facts with the same type, fields, and predecessors must produce the
//! same canonical string on every node, so the encoding fixes key order and
//! reference order rather than relying on serializer defaults.

use std::collections::BTreeMap;

use base64::URL_SAFE_NO_PAD;
use serde_json::{Map, Value};
use sha2::{Digest, Sha512};

use crate::fact::{FactReference, PredecessorCollection};

#[cfg(test)]
#[path = "canonical_test.rs"]
mod canonical_test;

/// Emits the canonical UTF-8 form of `(fields, predecessors)`.
///
/// Fields are sorted by key; predecessor roles are sorted by name; the
/// references of a multi-valued role are sorted by `(type, hash)`. Values
/// are rendered with `serde_json`, which keeps integer and string encoding
/// stable across platforms.
pub fn canonical_form(
    fields: &Map<String, Value>,
    predecessors: &BTreeMap<String, PredecessorCollection>,
) -> String {
    let mut out = String::from("{\"fields\":{");
    let mut keys: Vec<&String> = fields.keys().collect();
    keys.sort();
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&json_string(key));
        out.push(':');
        out.push_str(&serde_json::to_string(&fields[*key]).expect("JSON value serializes"));
    }
    out.push_str("},\"predecessors\":{");
    for (i, (role, collection)) in predecessors.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&json_string(role));
        out.push(':');
        match collection {
            PredecessorCollection::Single(reference) => {
                out.push_str(&canonical_reference(reference));
            }
            PredecessorCollection::Multiple(references) => {
                let mut sorted: Vec<&FactReference> = references.iter().collect();
                sorted.sort();
                out.push('[');
                for (j, reference) in sorted.iter().enumerate() {
                    if j > 0 {
                        out.push(',');
                    }
                    out.push_str(&canonical_reference(reference));
                }
                out.push(']');
            }
        }
    }
    out.push_str("}}");
    out
}

/// Base64 SHA-512 of the canonical form; this is the fact hash.
pub fn hash_canonical(canonical: &str) -> String {
    base64::encode(Sha512::digest(canonical.as_bytes()))
}

/// URL-safe unpadded base64 SHA-512, used to address feed definitions.
pub fn url_safe_hash(bytes: &[u8]) -> String {
    base64::encode_config(Sha512::digest(bytes), URL_SAFE_NO_PAD)
}

fn canonical_reference(reference: &FactReference) -> String {
    format!(
        "{{\"hash\":{},\"type\":{}}}",
        json_string(&reference.hash),
        json_string(&reference.fact_type)
    )
}

fn json_string(value: &str) -> String {
    serde_json::to_string(value).expect("strings serialize")
}
