use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tether_model::fact::{FactEnvelope, FactRecord};
use tether_model::identity;
use tracing::instrument;

use crate::errors::KeystoreResult;
use crate::keystore::{KeyStore, UserIdentity};
use crate::memory::{generate_key_pair, StoredKeyPair};
use crate::signing::sign_facts_with;

/// Keystore persisting keypairs in the `user` table of the store schema.
pub struct PostgresKeyStore {
    pool: PgPool,
    schema: String,
}

impl PostgresKeyStore {
    pub fn new(pool: PgPool, schema: &str) -> Self {
        Self { pool, schema: schema.to_string() }
    }

    async fn find(&self, identity: &UserIdentity) -> KeystoreResult<Option<StoredKeyPair>> {
        let sql = format!(
            "SELECT private_key, public_key FROM {schema}.\"user\" \
             WHERE provider = $1 AND user_identifier = $2",
            schema = self.schema,
        );
        let row = sqlx::query(&sql)
            .bind(&identity.provider)
            .bind(&identity.id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            Ok(StoredKeyPair {
                private_key_pem: row.try_get("private_key")?,
                public_key_pem: row.try_get("public_key")?,
            })
        })
        .transpose()
    }

    /// Generates a pair on first use. Two racing creators both insert with
    /// `ON CONFLICT DO NOTHING`; the subsequent read returns whichever pair
    /// landed, so both callers agree on the durable key.
    #[instrument(skip(self), err)]
    async fn get_or_generate(&self, identity: &UserIdentity) -> KeystoreResult<StoredKeyPair> {
        if let Some(existing) = self.find(identity).await? {
            return Ok(existing);
        }
        let pair = generate_key_pair()?;
        let sql = format!(
            "INSERT INTO {schema}.\"user\" \
             (provider, user_identifier, private_key, public_key) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (provider, user_identifier) DO NOTHING",
            schema = self.schema,
        );
        sqlx::query(&sql)
            .bind(&identity.provider)
            .bind(&identity.id)
            .bind(&pair.private_key_pem)
            .bind(&pair.public_key_pem)
            .execute(&self.pool)
            .await?;
        Ok(self.find(identity).await?.unwrap_or(pair))
    }
}

#[async_trait]
impl KeyStore for PostgresKeyStore {
    async fn get_or_create_user_fact(
        &self,
        identity: &UserIdentity,
    ) -> KeystoreResult<FactRecord> {
        let pair = self.get_or_generate(identity).await?;
        Ok(identity::user_fact(&pair.public_key_pem))
    }

    async fn get_or_create_device_fact(
        &self,
        identity: &UserIdentity,
    ) -> KeystoreResult<FactRecord> {
        let pair = self.get_or_generate(identity).await?;
        Ok(identity::device_fact(&pair.public_key_pem))
    }

    async fn get_user_fact(
        &self,
        identity: &UserIdentity,
    ) -> KeystoreResult<Option<FactRecord>> {
        Ok(self
            .find(identity)
            .await?
            .map(|pair| identity::user_fact(&pair.public_key_pem)))
    }

    async fn get_device_fact(
        &self,
        identity: &UserIdentity,
    ) -> KeystoreResult<Option<FactRecord>> {
        Ok(self
            .find(identity)
            .await?
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
        let pair = self.get_or_generate(identity).await?;
        sign_facts_with(&pair.private_key_pem, &pair.public_key_pem, facts)
    }
}
