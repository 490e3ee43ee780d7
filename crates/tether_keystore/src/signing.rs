//! Signature creation and verification.
//!
//! The signed message is the fact's hash string (the base64 SHA-512 of its
//! canonical bytes), digested with SHA-512 and signed with PKCS#1 v1.5.

use rsa::pkcs8::DecodePrivateKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha512};
use tether_model::fact::{FactEnvelope, FactRecord, FactSignature};
use tracing::warn;

use crate::errors::KeystoreResult;

#[cfg(test)]
#[path = "signing_test.rs"]
mod signing_test;

/// Signs each fact with the given keypair. A fact whose supplied hash does
/// not match its content is not signed; the fact is still returned so the
/// authorization gate can decide its fate.
pub fn sign_facts_with(
    private_key_pem: &str,
    public_key_pem: &str,
    facts: Vec<FactRecord>,
) -> KeystoreResult<Vec<FactEnvelope>> {
    let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)?;
    let mut envelopes = Vec::with_capacity(facts.len());
    for fact in facts {
        if !fact.verify_hash() {
            warn!(fact_type = %fact.fact_type, "hash mismatch, fact left unsigned");
            envelopes.push(FactEnvelope::unsigned(fact));
            continue;
        }
        let digest = Sha512::digest(fact.hash.as_bytes());
        let signature = private_key.sign(Pkcs1v15Sign::new::<Sha512>(), &digest)?;
        envelopes.push(FactEnvelope {
            fact,
            signatures: vec![FactSignature {
                public_key: public_key_pem.to_string(),
                signature: base64::encode(signature),
            }],
        });
    }
    Ok(envelopes)
}

/// Drops every signature that does not verify: a recomputed-hash mismatch
/// quarantines the fact (all signatures dropped), and each remaining
/// signature must verify against its own public key.
pub fn verify_envelope(envelope: FactEnvelope) -> FactEnvelope {
    let envelope = envelope.sanitized();
    let hash = envelope.fact.hash.clone();
    let FactEnvelope { fact, signatures } = envelope;
    let surviving = signatures
        .into_iter()
        .filter(|signature| {
            if verifies(&hash, signature) {
                true
            } else {
                warn!(fact_type = %fact.fact_type, "dropping signature that does not verify");
                false
            }
        })
        .collect();
    FactEnvelope { fact, signatures: surviving }
}

fn verifies(hash: &str, signature: &FactSignature) -> bool {
    let Ok(public_key) = RsaPublicKey::from_public_key_pem(&signature.public_key) else {
        return false;
    };
    let Ok(signature_bytes) = base64::decode(&signature.signature) else {
        return false;
    };
    let digest = Sha512::digest(hash.as_bytes());
    public_key
        .verify(Pkcs1v15Sign::new::<Sha512>(), &digest, &signature_bytes)
        .is_ok()
}
