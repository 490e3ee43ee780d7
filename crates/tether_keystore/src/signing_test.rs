use std::collections::BTreeMap;

use pretty_assertions::assert_eq;
use serde_json::json;
use tether_model::fact::FactRecord;

use crate::memory::generate_key_pair;
use crate::signing::{sign_facts_with, verify_envelope};

fn sample_fact() -> FactRecord {
    FactRecord::new(
        "Order",
        json!({ "createdAt": "T0" }).as_object().unwrap().clone(),
        BTreeMap::new(),
    )
}

#[test]
fn signatures_verify_against_their_own_key() {
    let pair = generate_key_pair().unwrap();
    let envelopes =
        sign_facts_with(&pair.private_key_pem, &pair.public_key_pem, vec![sample_fact()])
            .unwrap();
    assert_eq!(envelopes[0].signatures.len(), 1);

    let verified = verify_envelope(envelopes[0].clone());
    assert_eq!(verified.signatures.len(), 1);
}

#[test]
fn a_signature_attributed_to_another_key_is_dropped() {
    let signer = generate_key_pair().unwrap();
    let impostor = generate_key_pair().unwrap();

    let mut envelopes =
        sign_facts_with(&signer.private_key_pem, &signer.public_key_pem, vec![sample_fact()])
            .unwrap();
    // Claim the signature came from a different key.
    envelopes[0].signatures[0].public_key = impostor.public_key_pem;

    let verified = verify_envelope(envelopes.remove(0));
    assert!(verified.signatures.is_empty());
}

#[test]
fn a_fact_with_a_forged_hash_is_not_signed() {
    let pair = generate_key_pair().unwrap();
    let mut fact = sample_fact();
    fact.hash = "forged".to_string();

    let envelopes =
        sign_facts_with(&pair.private_key_pem, &pair.public_key_pem, vec![fact]).unwrap();
    // The fact is still delivered, unsigned.
    assert_eq!(envelopes.len(), 1);
    assert!(envelopes[0].signatures.is_empty());
}

#[test]
fn a_tampered_fact_loses_its_signatures_on_verification() {
    let pair = generate_key_pair().unwrap();
    let mut envelopes =
        sign_facts_with(&pair.private_key_pem, &pair.public_key_pem, vec![sample_fact()])
            .unwrap();
    envelopes[0].fact.fields.insert("createdAt".to_string(), json!("T9"));

    let verified = verify_envelope(envelopes.remove(0));
    assert!(verified.signatures.is_empty());
}
