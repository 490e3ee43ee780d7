//! The Postgres store. Writes commit the full `(fact, edges, ancestors,
//! signatures)` tuple in one transaction; reads compile specifications to
//! SQL and compose the row sets. Interned ids allocated inside a
//! transaction are merged into the process-wide cache only after commit.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde_json::{json, Value};
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tether_compiler::{
    decode_bookmark,
    encode_bookmark,
    referenced_names,
    referenced_names_of_specification,
    validate_given,
    FeedDefinition,
    SchemaIndex,
    SpecificationCompiler,
    SpecificationSqlQuery,
    SqlParameter,
    SqlQueryTree,
};
use tether_model::fact::{FactEnvelope, FactRecord, FactReference, FactSignature};
use tether_model::graph::sort_topologically;
use tether_model::results::{FactFeed, FeedTuple, ProjectedResult, ReferencesByName};
use tether_model::specification::Specification;
use tracing::{debug, instrument};

use crate::errors::{StorageError, StorageResult};
use crate::interning::{PendingIds, SchemaCache};
use crate::results::{compose, find_fact_references, ResultSetFact, ResultSetRow, RowSetTree};
use crate::retry::with_retry;
use crate::schema;
use crate::store::Store;

pub struct PostgresStore {
    pool: PgPool,
    schema: String,
    cache: SchemaCache,
}

impl PostgresStore {
    /// Validates the schema name, bootstraps the tables, and wraps the
    /// pool. One store per schema; multiple schemas share the engine via
    /// distinct pools.
    pub async fn new(pool: PgPool, schema_name: &str) -> StorageResult<Self> {
        schema::bootstrap(&pool, schema_name).await?;
        Ok(Self { pool, schema: schema_name.to_string(), cache: SchemaCache::new() })
    }

    fn compiler(&self) -> SpecificationCompiler<'_, SchemaCache> {
        SpecificationCompiler::new(&self.cache, &self.schema)
    }
}

#[async_trait]
impl Store for PostgresStore {
    #[instrument(skip_all, fields(batch = envelopes.len()), err)]
    async fn save(&self, envelopes: Vec<FactEnvelope>) -> StorageResult<Vec<FactEnvelope>> {
        let mut signatures_by_reference: HashMap<FactReference, Vec<FactSignature>> =
            HashMap::new();
        let mut facts = Vec::with_capacity(envelopes.len());
        for envelope in envelopes {
            let envelope = envelope.sanitized();
            signatures_by_reference
                .entry(envelope.fact.reference())
                .or_default()
                .extend(envelope.signatures);
            facts.push(envelope.fact);
        }
        let batch = sort_topologically(facts)?;

        let (inserted, pending) = with_retry("save", || {
            self.save_batch(&batch.facts, &batch.external, &signatures_by_reference)
        })
        .await?;
        // Ids become visible to other requests only after the commit.
        self.cache.merge(pending);

        Ok(inserted)
    }

    #[instrument(skip_all, err)]
    async fn read(
        &self,
        start: &[FactReference],
        specification: &Specification,
    ) -> StorageResult<Vec<ProjectedResult>> {
        validate_given(&specification.given, start)?;
        self.cache
            .ensure_loaded(
                &self.pool,
                &self.schema,
                &referenced_names_of_specification(specification),
            )
            .await?;

        let Some(tree) = self.compiler().result_query_tree(start, specification)? else {
            return Ok(Vec::new());
        };
        let rows = self.run_query_tree(&tree).await?;

        let references = find_fact_references(&tree, &rows);
        let mut records: HashMap<FactReference, Value> = HashMap::new();
        for envelope in self.load(&references).await? {
            records.insert(
                envelope.fact.reference(),
                serde_json::to_value(&envelope.fact).expect("fact records serialize"),
            );
        }

        let given_tuple: ReferencesByName = specification
            .given
            .iter()
            .zip(start)
            .map(|(label, reference)| (label.name.clone(), reference.clone()))
            .collect();
        compose(&tree, &rows, &given_tuple, &records)
    }

    #[instrument(skip_all, fields(bookmark), err)]
    async fn feed(
        &self,
        feed: &FeedDefinition,
        start: &[FactReference],
        bookmark: &str,
        limit: i64,
    ) -> StorageResult<FactFeed> {
        validate_given(&feed.given, start)?;
        let after = decode_bookmark(bookmark)?;
        self.cache
            .ensure_loaded(
                &self.pool,
                &self.schema,
                &referenced_names(&feed.given, &feed.matches),
            )
            .await?;

        let Some(query) = self.compiler().feed_query(start, feed, &after, limit)? else {
            return Ok(FactFeed { tuples: Vec::new(), bookmark: bookmark.to_string() });
        };

        let rows = bind_parameters(sqlx::query(&query.sql), &query.parameters)
            .fetch_all(&self.pool)
            .await?;
        let mut tuples = Vec::with_capacity(rows.len());
        let mut last_bookmark = bookmark.to_string();
        for row in rows {
            let mut facts = Vec::with_capacity(query.output_fact_indexes.len());
            for fact_index in &query.output_fact_indexes {
                let label = query
                    .labels
                    .iter()
                    .find(|l| l.fact_index == *fact_index)
                    .expect("every output is labeled");
                let hash: String = row.try_get(format!("hash{fact_index}").as_str())?;
                facts.push(FactReference::new(label.fact_type.clone(), hash));
            }
            let ids: Vec<i64> = row.try_get("bookmark")?;
            let tuple_bookmark = encode_bookmark(&ids);
            last_bookmark = tuple_bookmark.clone();
            tuples.push(FeedTuple { facts, bookmark: tuple_bookmark });
        }
        Ok(FactFeed { tuples, bookmark: last_bookmark })
    }

    async fn which_exist(
        &self,
        references: &[FactReference],
    ) -> StorageResult<Vec<FactReference>> {
        if references.is_empty() {
            return Ok(Vec::new());
        }
        let found = self.existing_ids(references).await?;
        Ok(references
            .iter()
            .filter(|reference| found.contains_key(*reference))
            .cloned()
            .collect())
    }

    #[instrument(skip_all, fields(references = references.len()), err)]
    async fn load(&self, references: &[FactReference]) -> StorageResult<Vec<FactEnvelope>> {
        if references.is_empty() {
            return Ok(Vec::new());
        }
        let pairs = reference_pairs_clause(references.len(), 0);
        let sql = format!(
            "WITH target AS (\
             SELECT f.fact_id FROM {schema}.fact f \
             JOIN {schema}.fact_type t ON t.fact_type_id = f.fact_type_id \
             WHERE (t.name, f.hash) IN ({pairs})), \
             expanded AS (\
             SELECT fact_id FROM target \
             UNION \
             SELECT a.ancestor_fact_id FROM {schema}.ancestor a \
             JOIN target t ON a.fact_id = t.fact_id) \
             SELECT f.fact_id, t.name AS type, f.hash, f.data \
             FROM {schema}.fact f \
             JOIN {schema}.fact_type t ON t.fact_type_id = f.fact_type_id \
             JOIN expanded e ON e.fact_id = f.fact_id \
             ORDER BY f.fact_id ASC",
            schema = self.schema,
        );
        let mut query = sqlx::query(&sql);
        for reference in references {
            query = query.bind(&reference.fact_type).bind(&reference.hash);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut fact_ids = Vec::with_capacity(rows.len());
        let mut envelopes = Vec::with_capacity(rows.len());
        let mut position_by_id: HashMap<i64, usize> = HashMap::new();
        for row in rows {
            let fact_id: i64 = row.try_get("fact_id")?;
            let fact_type: String = row.try_get("type")?;
            let hash: String = row.try_get("hash")?;
            let data: Value = row.try_get("data")?;
            let fact = record_from_data(&fact_type, &hash, data)?;
            position_by_id.insert(fact_id, envelopes.len());
            fact_ids.push(fact_id);
            envelopes.push(FactEnvelope::unsigned(fact));
        }

        if !fact_ids.is_empty() {
            let sql = format!(
                "SELECT s.fact_id, p.public_key, s.signature \
                 FROM {schema}.signature s \
                 JOIN {schema}.public_key p ON p.public_key_id = s.public_key_id \
                 WHERE s.fact_id = ANY($1)",
                schema = self.schema,
            );
            let rows = sqlx::query(&sql).bind(&fact_ids).fetch_all(&self.pool).await?;
            for row in rows {
                let fact_id: i64 = row.try_get("fact_id")?;
                let public_key: String = row.try_get("public_key")?;
                let signature: String = row.try_get("signature")?;
                if let Some(&position) = position_by_id.get(&fact_id) {
                    envelopes[position]
                        .signatures
                        .push(FactSignature { public_key, signature });
                }
            }
        }
        Ok(envelopes)
    }

    #[instrument(skip_all, err)]
    async fn purge(&self, conditions: &[Specification]) -> StorageResult<u64> {
        let mut purged = 0;
        for condition in conditions {
            self.cache
                .ensure_loaded(
                    &self.pool,
                    &self.schema,
                    &referenced_names(&condition.given, &condition.matches),
                )
                .await?;
            let Some(query) = self.compiler().purge_query(condition)? else {
                continue;
            };
            let result = bind_parameters(sqlx::query(&query.sql), &query.parameters)
                .execute(&self.pool)
                .await?;
            debug!(rows = result.rows_affected(), "purge condition applied");
            purged += result.rows_affected();
        }
        Ok(purged)
    }

    async fn purge_descendants(
        &self,
        purge_root: &FactReference,
        triggers: &[FactReference],
    ) -> StorageResult<u64> {
        if triggers.is_empty() {
            return Ok(0);
        }
        let pairs = reference_pairs_clause(triggers.len(), 2);
        let sql = format!(
            "WITH purge_root AS (\
             SELECT f.fact_id FROM {schema}.fact f \
             JOIN {schema}.fact_type t ON t.fact_type_id = f.fact_type_id \
             WHERE t.name = $1 AND f.hash = $2), \
             trigger_facts AS (\
             SELECT f.fact_id FROM {schema}.fact f \
             JOIN {schema}.fact_type t ON t.fact_type_id = f.fact_type_id \
             WHERE (t.name, f.hash) IN ({pairs})), \
             targets AS (\
             SELECT a.fact_id FROM {schema}.ancestor a \
             JOIN purge_root r ON a.ancestor_fact_id = r.fact_id \
             WHERE NOT EXISTS (\
             SELECT 1 FROM {schema}.ancestor a2 \
             JOIN trigger_facts tf ON a2.fact_id = tf.fact_id \
             WHERE a2.ancestor_fact_id = a.fact_id) \
             AND NOT EXISTS (\
             SELECT 1 FROM trigger_facts tf2 WHERE tf2.fact_id = a.fact_id)) \
             DELETE FROM {schema}.fact f USING targets t WHERE f.fact_id = t.fact_id",
            schema = self.schema,
        );
        let mut query = sqlx::query(&sql).bind(&purge_root.fact_type).bind(&purge_root.hash);
        for trigger in triggers {
            query = query.bind(&trigger.fact_type).bind(&trigger.hash);
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

impl PostgresStore {
    /// One attempt of the save transaction. Retried wholesale on transient
    /// failure.
    async fn save_batch(
        &self,
        facts: &[FactRecord],
        external: &[FactReference],
        signatures_by_reference: &HashMap<FactReference, Vec<FactSignature>>,
    ) -> StorageResult<(Vec<FactEnvelope>, PendingIds)> {
        let mut tx = self.pool.begin().await?;
        let mut pending = PendingIds::default();

        // Every external predecessor must already be stored.
        let mut fact_ids: HashMap<FactReference, i64> = HashMap::new();
        if !external.is_empty() {
            let existing = existing_ids_in(&mut tx, &self.schema, external).await?;
            let missing: Vec<FactReference> = external
                .iter()
                .filter(|reference| !existing.contains_key(*reference))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(StorageError::MissingPredecessors(missing));
            }
            fact_ids.extend(existing);
        }

        let mut inserted = Vec::new();
        for fact in facts {
            let fact_type_id =
                self.intern_fact_type(&mut tx, &fact.fact_type, &mut pending).await?;
            let data = json!({ "fields": fact.fields, "predecessors": fact.predecessors });

            let sql = format!(
                "INSERT INTO {schema}.fact (fact_type_id, hash, data) VALUES ($1, $2, $3) \
                 ON CONFLICT (fact_type_id, hash) DO NOTHING RETURNING fact_id",
                schema = self.schema,
            );
            let new_row = sqlx::query(&sql)
                .bind(fact_type_id)
                .bind(&fact.hash)
                .bind(&data)
                .fetch_optional(&mut *tx)
                .await?;

            let reference = fact.reference();
            let signatures =
                signatures_by_reference.get(&reference).cloned().unwrap_or_default();
            let fact_id = match new_row {
                Some(row) => {
                    let fact_id: i64 = row.try_get("fact_id")?;
                    self.insert_edges_and_ancestors(
                        &mut tx,
                        fact,
                        fact_type_id,
                        fact_id,
                        &fact_ids,
                        &mut pending,
                    )
                    .await?;
                    inserted.push(FactEnvelope {
                        fact: fact.clone(),
                        signatures: signatures.clone(),
                    });
                    fact_id
                }
                None => {
                    let sql = format!(
                        "SELECT fact_id FROM {schema}.fact \
                         WHERE fact_type_id = $1 AND hash = $2",
                        schema = self.schema,
                    );
                    let row = sqlx::query(&sql)
                        .bind(fact_type_id)
                        .bind(&fact.hash)
                        .fetch_one(&mut *tx)
                        .await?;
                    row.try_get("fact_id")?
                }
            };
            fact_ids.insert(reference, fact_id);

            for signature in &signatures {
                let public_key_id = self
                    .intern_public_key(&mut tx, &signature.public_key, &mut pending)
                    .await?;
                let sql = format!(
                    "INSERT INTO {schema}.signature (fact_id, public_key_id, signature) \
                     VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
                    schema = self.schema,
                );
                sqlx::query(&sql)
                    .bind(fact_id)
                    .bind(public_key_id)
                    .bind(&signature.signature)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok((inserted, pending))
    }

    async fn insert_edges_and_ancestors(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        fact: &FactRecord,
        fact_type_id: i32,
        fact_id: i64,
        fact_ids: &HashMap<FactReference, i64>,
        pending: &mut PendingIds,
    ) -> StorageResult<()> {
        for (role_name, collection) in &fact.predecessors {
            let role_id =
                self.intern_role(tx, fact_type_id, role_name, pending).await?;
            for predecessor in collection.references() {
                let predecessor_id = *fact_ids
                    .get(predecessor)
                    .expect("predecessors precede successors in a sorted batch");
                let sql = format!(
                    "INSERT INTO {schema}.edge \
                     (successor_fact_id, predecessor_fact_id, role_id) \
                     VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
                    schema = self.schema,
                );
                sqlx::query(&sql)
                    .bind(fact_id)
                    .bind(predecessor_id)
                    .bind(role_id)
                    .execute(&mut **tx)
                    .await?;

                let sql = format!(
                    "INSERT INTO {schema}.ancestor (fact_id, ancestor_fact_id) \
                     SELECT $1, a.ancestor_fact_id FROM {schema}.ancestor a \
                     WHERE a.fact_id = $2 \
                     UNION SELECT $1, $2 \
                     ON CONFLICT DO NOTHING",
                    schema = self.schema,
                );
                sqlx::query(&sql)
                    .bind(fact_id)
                    .bind(predecessor_id)
                    .execute(&mut **tx)
                    .await?;
            }
        }
        Ok(())
    }

    async fn intern_fact_type(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        name: &str,
        pending: &mut PendingIds,
    ) -> StorageResult<i32> {
        if let Some(id) = self.cache.fact_type_id(name) {
            return Ok(id);
        }
        if let Some((_, id)) = pending.fact_types.iter().find(|(n, _)| n == name) {
            return Ok(*id);
        }
        let sql = format!(
            "INSERT INTO {schema}.fact_type (name) VALUES ($1) \
             ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name \
             RETURNING fact_type_id",
            schema = self.schema,
        );
        let row = sqlx::query(&sql).bind(name).fetch_one(&mut **tx).await?;
        let id: i32 = row.try_get("fact_type_id")?;
        pending.fact_types.push((name.to_string(), id));
        Ok(id)
    }

    async fn intern_role(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        defining_fact_type_id: i32,
        name: &str,
        pending: &mut PendingIds,
    ) -> StorageResult<i32> {
        if let Some(id) = self.cache.role_id(defining_fact_type_id, name) {
            return Ok(id);
        }
        let key = (defining_fact_type_id, name.to_string());
        if let Some((_, id)) = pending.roles.iter().find(|(k, _)| *k == key) {
            return Ok(*id);
        }
        let sql = format!(
            "INSERT INTO {schema}.role (defining_fact_type_id, name) VALUES ($1, $2) \
             ON CONFLICT (defining_fact_type_id, name) DO UPDATE SET name = EXCLUDED.name \
             RETURNING role_id",
            schema = self.schema,
        );
        let row = sqlx::query(&sql)
            .bind(defining_fact_type_id)
            .bind(name)
            .fetch_one(&mut **tx)
            .await?;
        let id: i32 = row.try_get("role_id")?;
        pending.roles.push((key, id));
        Ok(id)
    }

    async fn intern_public_key(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        public_key: &str,
        pending: &mut PendingIds,
    ) -> StorageResult<i32> {
        if let Some(id) = self.cache.public_key_id(public_key) {
            return Ok(id);
        }
        if let Some((_, id)) = pending.public_keys.iter().find(|(k, _)| k == public_key) {
            return Ok(*id);
        }
        let sql = format!(
            "INSERT INTO {schema}.public_key (public_key) VALUES ($1) \
             ON CONFLICT (public_key) DO UPDATE SET public_key = EXCLUDED.public_key \
             RETURNING public_key_id",
            schema = self.schema,
        );
        let row = sqlx::query(&sql).bind(public_key).fetch_one(&mut **tx).await?;
        let id: i32 = row.try_get("public_key_id")?;
        pending.public_keys.push((public_key.to_string(), id));
        Ok(id)
    }

    fn run_query_tree<'a>(
        &'a self,
        tree: &'a SqlQueryTree,
    ) -> BoxFuture<'a, StorageResult<RowSetTree>> {
        async move {
            let rows = match &tree.query {
                Some(query) => self.fetch_result_rows(query).await?,
                None => Vec::new(),
            };
            let mut children = Vec::with_capacity(tree.children.len());
            for (name, child) in &tree.children {
                children.push((name.clone(), self.run_query_tree(child).await?));
            }
            Ok(RowSetTree { rows, children })
        }
        .boxed()
    }

    async fn fetch_result_rows(
        &self,
        query: &SpecificationSqlQuery,
    ) -> StorageResult<Vec<ResultSetRow>> {
        let rows = bind_parameters(sqlx::query(&query.sql), &query.parameters)
            .fetch_all(&self.pool)
            .await?;
        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            let mut decoded = ResultSetRow::new();
            for label in &query.labels {
                let i = label.fact_index;
                decoded.insert(
                    i,
                    ResultSetFact {
                        hash: row.try_get(format!("hash{i}").as_str())?,
                        fact_id: row.try_get(format!("id{i}").as_str())?,
                        data: row.try_get(format!("data{i}").as_str())?,
                        date_learned: row.try_get(format!("time{i}").as_str())?,
                    },
                );
            }
            result.push(decoded);
        }
        Ok(result)
    }

    async fn existing_ids(
        &self,
        references: &[FactReference],
    ) -> StorageResult<HashMap<FactReference, i64>> {
        let pairs = reference_pairs_clause(references.len(), 0);
        let sql = format!(
            "SELECT t.name AS type, f.hash, f.fact_id FROM {schema}.fact f \
             JOIN {schema}.fact_type t ON t.fact_type_id = f.fact_type_id \
             WHERE (t.name, f.hash) IN ({pairs})",
            schema = self.schema,
        );
        let mut query = sqlx::query(&sql);
        for reference in references {
            query = query.bind(&reference.fact_type).bind(&reference.hash);
        }
        let rows = query.fetch_all(&self.pool).await?;
        collect_reference_ids(rows)
    }
}

async fn existing_ids_in(
    tx: &mut Transaction<'_, Postgres>,
    schema: &str,
    references: &[FactReference],
) -> StorageResult<HashMap<FactReference, i64>> {
    let pairs = reference_pairs_clause(references.len(), 0);
    let sql = format!(
        "SELECT t.name AS type, f.hash, f.fact_id FROM {schema}.fact f \
         JOIN {schema}.fact_type t ON t.fact_type_id = f.fact_type_id \
         WHERE (t.name, f.hash) IN ({pairs})"
    );
    let mut query = sqlx::query(&sql);
    for reference in references {
        query = query.bind(&reference.fact_type).bind(&reference.hash);
    }
    let rows = query.fetch_all(&mut **tx).await?;
    collect_reference_ids(rows)
}

fn collect_reference_ids(
    rows: Vec<sqlx::postgres::PgRow>,
) -> StorageResult<HashMap<FactReference, i64>> {
    let mut found = HashMap::with_capacity(rows.len());
    for row in rows {
        let fact_type: String = row.try_get("type")?;
        let hash: String = row.try_get("hash")?;
        let fact_id: i64 = row.try_get("fact_id")?;
        found.insert(FactReference::new(fact_type, hash), fact_id);
    }
    Ok(found)
}

/// `(($1,$2),($3,$4),…)` starting after `offset` bound parameters.
fn reference_pairs_clause(count: usize, offset: usize) -> String {
    (0..count)
        .map(|i| format!("(${},${})", offset + 2 * i + 1, offset + 2 * i + 2))
        .collect::<Vec<_>>()
        .join(",")
}

fn bind_parameters<'q>(
    query: Query<'q, Postgres, PgArguments>,
    parameters: &'q [SqlParameter],
) -> Query<'q, Postgres, PgArguments> {
    parameters.iter().fold(query, |query, parameter| match parameter {
        SqlParameter::Int(value) => query.bind(*value),
        SqlParameter::BigInt(value) => query.bind(*value),
        SqlParameter::String(value) => query.bind(value),
        SqlParameter::BigIntArray(value) => query.bind(value),
    })
}

/// Rebuilds a wire record from the stored `data` column.
fn record_from_data(fact_type: &str, hash: &str, data: Value) -> StorageResult<FactRecord> {
    let fields = data
        .get("fields")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let predecessors: BTreeMap<String, tether_model::fact::PredecessorCollection> = data
        .get("predecessors")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|error| StorageError::Unavailable(format!("corrupt fact data: {error}")))?
        .unwrap_or_default();
    Ok(FactRecord {
        fact_type: fact_type.to_string(),
        hash: hash.to_string(),
        fields,
        predecessors,
    })
}
