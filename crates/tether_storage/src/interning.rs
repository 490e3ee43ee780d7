//! Process-wide interning of fact type, role, and public-key ids.
//!
//! The maps are append-only: an id once assigned never changes. During a
//! write transaction, freshly allocated ids are held aside and merged into
//! the shared maps only after the transaction commits, so a rolled-back
//! allocation never poisons the cache. A cache miss on the read path falls
//! back to a SELECT.

use dashmap::DashMap;
use sqlx::{PgPool, Row};
use tether_compiler::{ReferencedNames, SchemaIndex};

use crate::errors::StorageResult;

#[derive(Default)]
pub struct SchemaCache {
    fact_types: DashMap<String, i32>,
    roles: DashMap<(i32, String), i32>,
    public_keys: DashMap<String, i32>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads any referenced names that are not yet cached. Names that do
    /// not exist in the store stay uncached, which renders the dependent
    /// query unsatisfiable.
    pub async fn ensure_loaded(
        &self,
        pool: &PgPool,
        schema: &str,
        names: &ReferencedNames,
    ) -> StorageResult<()> {
        let missing_types: Vec<String> = names
            .fact_types
            .iter()
            .filter(|name| !self.fact_types.contains_key(*name))
            .cloned()
            .collect();
        if !missing_types.is_empty() {
            let sql = format!(
                "SELECT name, fact_type_id FROM {schema}.fact_type WHERE name = ANY($1)"
            );
            let rows = sqlx::query(&sql).bind(&missing_types).fetch_all(pool).await?;
            for row in rows {
                let name: String = row.try_get("name")?;
                let id: i32 = row.try_get("fact_type_id")?;
                self.fact_types.insert(name, id);
            }
        }

        for (defining_type, role_name) in &names.roles {
            let Some(type_id) = self.fact_type_id(defining_type) else {
                continue;
            };
            if self.roles.contains_key(&(type_id, role_name.clone())) {
                continue;
            }
            let sql = format!(
                "SELECT role_id FROM {schema}.role \
                 WHERE defining_fact_type_id = $1 AND name = $2"
            );
            let row = sqlx::query(&sql)
                .bind(type_id)
                .bind(role_name)
                .fetch_optional(pool)
                .await?;
            if let Some(row) = row {
                let id: i32 = row.try_get("role_id")?;
                self.roles.insert((type_id, role_name.clone()), id);
            }
        }
        Ok(())
    }

    pub fn merge(&self, pending: PendingIds) {
        for (name, id) in pending.fact_types {
            self.fact_types.insert(name, id);
        }
        for (key, id) in pending.roles {
            self.roles.insert(key, id);
        }
        for (key, id) in pending.public_keys {
            self.public_keys.insert(key, id);
        }
    }

    pub fn public_key_id(&self, public_key: &str) -> Option<i32> {
        self.public_keys.get(public_key).map(|entry| *entry)
    }
}

impl SchemaIndex for SchemaCache {
    fn fact_type_id(&self, name: &str) -> Option<i32> {
        self.fact_types.get(name).map(|entry| *entry)
    }

    fn role_id(&self, defining_fact_type_id: i32, name: &str) -> Option<i32> {
        self.roles.get(&(defining_fact_type_id, name.to_string())).map(|entry| *entry)
    }
}

/// Ids allocated inside a write transaction, merged into the cache on
/// commit.
#[derive(Default)]
pub struct PendingIds {
    pub fact_types: Vec<(String, i32)>,
    pub roles: Vec<((i32, String), i32)>,
    pub public_keys: Vec<(String, i32)>,
}
