//! Schema bootstrap for the Postgres backend.
//!
//! The schema name is caller-supplied and interpolated into DDL and query
//! text, so it is validated strictly before any SQL is built from it.

use regex::Regex;
use sqlx::PgPool;
use tracing::info;

use crate::errors::{StorageError, StorageResult};

#[cfg(test)]
#[path = "schema_test.rs"]
mod schema_test;

pub fn validate_schema_name(name: &str) -> StorageResult<()> {
    let pattern = Regex::new(r"^[a-z_][a-z0-9_$]*$").expect("schema name pattern is valid");
    if pattern.is_match(name) {
        Ok(())
    } else {
        Err(StorageError::InvalidSchemaName(name.to_string()))
    }
}

/// Creates the schema and its tables if they do not exist. Idempotent; run
/// once at store construction. `public.sort(bigint[], text)` backs the
/// descending-sorted bookmark column of feed queries; it lives in `public`
/// so the generated SQL can call it unqualified.
pub async fn bootstrap(pool: &PgPool, schema: &str) -> StorageResult<()> {
    validate_schema_name(schema)?;
    let statements = ddl_statements(schema);
    for statement in &statements {
        sqlx::query(statement).execute(pool).await?;
    }
    info!(schema, "storage schema ready");
    Ok(())
}

fn ddl_statements(schema: &str) -> Vec<String> {
    vec![
        format!("CREATE SCHEMA IF NOT EXISTS {schema}"),
        "CREATE OR REPLACE FUNCTION public.sort(ids bigint[], direction text) \
         RETURNS bigint[] AS $$ \
         SELECT CASE WHEN direction = 'desc' \
         THEN ARRAY(SELECT unnest(ids) ORDER BY 1 DESC) \
         ELSE ARRAY(SELECT unnest(ids) ORDER BY 1 ASC) END \
         $$ LANGUAGE SQL IMMUTABLE"
            .to_string(),
        format!(
            "CREATE TABLE IF NOT EXISTS {schema}.fact_type (\
             fact_type_id SERIAL PRIMARY KEY, \
             name VARCHAR NOT NULL, \
             UNIQUE (name))"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {schema}.role (\
             role_id SERIAL PRIMARY KEY, \
             defining_fact_type_id INTEGER NOT NULL \
             REFERENCES {schema}.fact_type ON DELETE CASCADE, \
             name VARCHAR NOT NULL, \
             UNIQUE (defining_fact_type_id, name))"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {schema}.fact (\
             fact_id BIGSERIAL PRIMARY KEY, \
             fact_type_id INTEGER NOT NULL REFERENCES {schema}.fact_type, \
             hash VARCHAR NOT NULL, \
             data JSONB NOT NULL, \
             date_learned TIMESTAMPTZ NOT NULL DEFAULT now(), \
             UNIQUE (fact_type_id, hash))"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {schema}.edge (\
             successor_fact_id BIGINT NOT NULL REFERENCES {schema}.fact ON DELETE CASCADE, \
             predecessor_fact_id BIGINT NOT NULL REFERENCES {schema}.fact ON DELETE CASCADE, \
             role_id INTEGER NOT NULL REFERENCES {schema}.role, \
             UNIQUE (successor_fact_id, predecessor_fact_id, role_id))"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS ix_edge_predecessor \
             ON {schema}.edge (predecessor_fact_id)"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS ix_edge_successor \
             ON {schema}.edge (successor_fact_id)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {schema}.ancestor (\
             fact_id BIGINT NOT NULL REFERENCES {schema}.fact ON DELETE CASCADE, \
             ancestor_fact_id BIGINT NOT NULL REFERENCES {schema}.fact ON DELETE CASCADE, \
             UNIQUE (fact_id, ancestor_fact_id))"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS ix_ancestor_of \
             ON {schema}.ancestor (ancestor_fact_id)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {schema}.public_key (\
             public_key_id SERIAL PRIMARY KEY, \
             public_key VARCHAR NOT NULL, \
             UNIQUE (public_key))"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {schema}.signature (\
             fact_id BIGINT NOT NULL REFERENCES {schema}.fact ON DELETE CASCADE, \
             public_key_id INTEGER NOT NULL REFERENCES {schema}.public_key, \
             signature VARCHAR NOT NULL, \
             UNIQUE (fact_id, public_key_id))"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {schema}.\"user\" (\
             provider VARCHAR NOT NULL, \
             user_identifier VARCHAR NOT NULL, \
             private_key VARCHAR NOT NULL, \
             public_key VARCHAR NOT NULL, \
             UNIQUE (provider, user_identifier))"
        ),
    ]
}
