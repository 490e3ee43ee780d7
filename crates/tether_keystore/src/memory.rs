use async_trait::async_trait;
use dashmap::DashMap;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use tether_model::fact::{FactEnvelope, FactRecord};
use tether_model::identity;

use crate::errors::KeystoreResult;
use crate::keystore::{KeyStore, UserIdentity};
use crate::signing::sign_facts_with;

#[cfg(test)]
#[path = "memory_test.rs"]
mod memory_test;

const KEY_BITS: usize = 2048;

#[derive(Clone)]
pub(crate) struct StoredKeyPair {
    pub(crate) private_key_pem: String,
    pub(crate) public_key_pem: String,
}

/// Keystore for tests and embedded setups; keypairs live for the process.
#[derive(Default)]
pub struct MemoryKeyStore {
    keys: DashMap<UserIdentity, StoredKeyPair>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_or_generate(&self, identity: &UserIdentity) -> KeystoreResult<StoredKeyPair> {
        if let Some(existing) = self.keys.get(identity) {
            return Ok(existing.clone());
        }
        let pair = generate_key_pair()?;
        // A concurrent generation for the same identity may have won; the
        // first inserted pair is the durable one.
        let entry = self.keys.entry(identity.clone()).or_insert(pair);
        Ok(entry.clone())
    }
}

pub(crate) fn generate_key_pair() -> KeystoreResult<StoredKeyPair> {
    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, KEY_BITS)?;
    let public_key = RsaPublicKey::from(&private_key);
    Ok(StoredKeyPair {
        private_key_pem: private_key.to_pkcs8_pem(LineEnding::LF)?.to_string(),
        public_key_pem: public_key.to_public_key_pem(LineEnding::LF)?,
    })
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn get_or_create_user_fact(
        &self,
        identity: &UserIdentity,
    ) -> KeystoreResult<FactRecord> {
        let pair = self.get_or_generate(identity)?;
        Ok(identity::user_fact(&pair.public_key_pem))
    }

    async fn get_or_create_device_fact(
        &self,
        identity: &UserIdentity,
    ) -> KeystoreResult<FactRecord> {
        let pair = self.get_or_generate(identity)?;
        Ok(identity::device_fact(&pair.public_key_pem))
    }

    async fn get_user_fact(
        &self,
        identity: &UserIdentity,
    ) -> KeystoreResult<Option<FactRecord>> {
        Ok(self
            .keys
            .get(identity)
            .map(|pair| identity::user_fact(&pair.public_key_pem)))
    }

    async fn get_device_fact(
        &self,
        identity: &UserIdentity,
    ) -> KeystoreResult<Option<FactRecord>> {
        Ok(self
            .keys
            .get(identity)
            .map(|pair| identity::device_fact(&pair.public_key_pem)))
    }

    async fn sign_facts(
        &self,
        identity: Option<&UserIdentity>,
        facts: Vec<FactRecord>,
    ) -> KeystoreResult<Vec<FactEnvelope>> {
        let Some(identity) = identity else {
            return Ok(facts.into_iter().map(FactEnvelope::unsigned).collect());
        };
        let pair = self.get_or_generate(identity)?;
        sign_facts_with(&pair.private_key_pem, &pair.public_key_pem, facts)
    }
}
