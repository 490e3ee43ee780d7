use async_trait::async_trait;
use tether_model::fact::{FactEnvelope, FactRecord};

use crate::errors::KeystoreResult;

/// An authenticated principal as reported by the upstream authenticator.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UserIdentity {
    pub provider: String,
    pub id: String,
}

impl UserIdentity {
    pub fn new(provider: impl Into<String>, id: impl Into<String>) -> Self {
        Self { provider: provider.into(), id: id.into() }
    }
}

/// Issues and retrieves keypairs, and signs fact batches.
///
/// A keypair is generated on the first `get_or_create_*` call for an
/// identity; every later call returns the same pair. Signing without an
/// identity produces envelopes with empty signature lists, which is legal
/// for unauthenticated writes when the authorization rules allow them.
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn get_or_create_user_fact(
        &self,
        identity: &UserIdentity,
    ) -> KeystoreResult<FactRecord>;

    async fn get_or_create_device_fact(
        &self,
        identity: &UserIdentity,
    ) -> KeystoreResult<FactRecord>;

    /// Read-only: `None` when no keypair has been issued yet.
    async fn get_user_fact(
        &self,
        identity: &UserIdentity,
    ) -> KeystoreResult<Option<FactRecord>>;

    async fn get_device_fact(
        &self,
        identity: &UserIdentity,
    ) -> KeystoreResult<Option<FactRecord>>;

    async fn sign_facts(
        &self,
        identity: Option<&UserIdentity>,
        facts: Vec<FactRecord>,
    ) -> KeystoreResult<Vec<FactEnvelope>>;
}
