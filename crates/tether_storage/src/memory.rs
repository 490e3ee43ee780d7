//! In-memory store. Evaluates specifications directly against the fact
//! arena instead of going through SQL, with the same observable semantics
//! as the Postgres store: idempotent saves, ascending-id result ordering,
//! bookmark-paginated feeds, and trigger-preserving purges.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tether_compiler::{decode_bookmark, encode_bookmark, validate_given, FeedDefinition};
use tether_model::fact::{FactEnvelope, FactRecord, FactReference, FactSignature};
use tether_model::graph::sort_topologically;
use tether_model::results::{FactFeed, FeedTuple, ProjectedResult, ReferencesByName};
use tether_model::specification::{Condition, Label, Match, PathCondition, Projection, Specification};

use crate::errors::{StorageError, StorageResult};
use crate::store::Store;

#[cfg(test)]
#[path = "memory_test.rs"]
mod memory_test;

struct StoredFact {
    id: i64,
    record: FactRecord,
    signatures: Vec<FactSignature>,
    /// Ids of the transitive predecessor closure, self excluded.
    ancestors: BTreeSet<i64>,
    date_learned: DateTime<Utc>,
}

#[derive(Clone)]
struct SuccessorEdge {
    role: String,
    successor: i64,
}

#[derive(Default)]
struct MemoryGraph {
    facts: BTreeMap<i64, StoredFact>,
    by_reference: HashMap<FactReference, i64>,
    successors: HashMap<i64, Vec<SuccessorEdge>>,
    next_id: i64,
}

/// The in-memory variant of the store, used by tests and embedded setups.
#[derive(Default)]
pub struct MemoryStore {
    graph: RwLock<MemoryGraph>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save(&self, envelopes: Vec<FactEnvelope>) -> StorageResult<Vec<FactEnvelope>> {
        let mut by_reference: HashMap<FactReference, Vec<FactSignature>> = HashMap::new();
        let mut facts = Vec::with_capacity(envelopes.len());
        for envelope in envelopes {
            let envelope = envelope.sanitized();
            by_reference
                .entry(envelope.fact.reference())
                .or_default()
                .extend(envelope.signatures);
            facts.push(envelope.fact);
        }
        let batch = sort_topologically(facts)?;

        let mut graph = self.graph.write().expect("memory graph lock is poisoned");
        let missing: Vec<FactReference> = batch
            .external
            .iter()
            .filter(|reference| !graph.by_reference.contains_key(reference))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(StorageError::MissingPredecessors(missing));
        }

        let mut inserted = Vec::new();
        for fact in batch.facts {
            let reference = fact.reference();
            let signatures = by_reference.remove(&reference).unwrap_or_default();
            if let Some(&existing_id) = graph.by_reference.get(&reference) {
                merge_signatures(
                    &mut graph.facts.get_mut(&existing_id).expect("indexed fact exists").signatures,
                    signatures,
                );
                continue;
            }

            let mut ancestors = BTreeSet::new();
            let mut edges = Vec::new();
            for (role, collection) in &fact.predecessors {
                for predecessor in collection.references() {
                    let predecessor_id = graph.by_reference[predecessor];
                    ancestors.insert(predecessor_id);
                    ancestors
                        .extend(graph.facts[&predecessor_id].ancestors.iter().copied());
                    edges.push((predecessor_id, role.clone()));
                }
            }

            graph.next_id += 1;
            let id = graph.next_id;
            graph.by_reference.insert(reference, id);
            for (predecessor_id, role) in edges {
                graph
                    .successors
                    .entry(predecessor_id)
                    .or_default()
                    .push(SuccessorEdge { role, successor: id });
            }
            inserted.push(FactEnvelope { fact: fact.clone(), signatures: signatures.clone() });
            graph.facts.insert(
                id,
                StoredFact {
                    id,
                    record: fact,
                    signatures,
                    ancestors,
                    date_learned: Utc::now(),
                },
            );
        }
        Ok(inserted)
    }

    async fn read(
        &self,
        start: &[FactReference],
        specification: &Specification,
    ) -> StorageResult<Vec<ProjectedResult>> {
        validate_given(&specification.given, start)?;
        let graph = self.graph.read().expect("memory graph lock is poisoned");

        let Some(initial) = initial_tuple(&graph, &specification.given, start) else {
            return Ok(Vec::new());
        };
        let mut tuples = eval_matches(&graph, &initial, &specification.matches)?;
        let outputs: Vec<&str> =
            specification.matches.iter().map(|m| m.unknown.name.as_str()).collect();
        sort_tuples(&mut tuples, &outputs);

        let own_labels: Vec<String> =
            specification.matches.iter().map(|m| m.unknown.name.clone()).collect();
        let mut results = Vec::with_capacity(tuples.len());
        for tuple in tuples {
            let value =
                project(&graph, &tuple, &specification.projection, &own_labels)?;
            results.push(ProjectedResult { tuple: references_of(&graph, &tuple), value });
        }
        Ok(results)
    }

    async fn feed(
        &self,
        feed: &FeedDefinition,
        start: &[FactReference],
        bookmark: &str,
        limit: i64,
    ) -> StorageResult<FactFeed> {
        validate_given(&feed.given, start)?;
        let after = decode_bookmark(bookmark)?;
        let graph = self.graph.read().expect("memory graph lock is poisoned");

        let Some(initial) = initial_tuple(&graph, &feed.given, start) else {
            return Ok(FactFeed { tuples: Vec::new(), bookmark: bookmark.to_string() });
        };
        let tuples = eval_matches(&graph, &initial, &feed.matches)?;
        let outputs: Vec<&str> = feed.matches.iter().map(|m| m.unknown.name.as_str()).collect();

        // Key each tuple by its descending-sorted id tuple; pages advance
        // in ascending key order.
        let mut keyed: BTreeMap<Vec<i64>, Vec<FactReference>> = BTreeMap::new();
        for tuple in &tuples {
            let mut key: Vec<i64> =
                outputs.iter().filter_map(|name| tuple.get(*name).copied()).collect();
            key.sort_unstable_by(|a, b| b.cmp(a));
            let facts = outputs
                .iter()
                .filter_map(|name| tuple.get(*name))
                .map(|id| graph.facts[id].record.reference())
                .collect();
            keyed.entry(key).or_insert(facts);
        }

        let mut page = Vec::new();
        let mut last_bookmark = bookmark.to_string();
        for (key, facts) in keyed.range(after.clone()..) {
            if *key <= after {
                continue;
            }
            if page.len() >= usize::try_from(limit).unwrap_or(usize::MAX) {
                break;
            }
            let tuple_bookmark = encode_bookmark(key);
            last_bookmark = tuple_bookmark.clone();
            page.push(FeedTuple { facts: facts.clone(), bookmark: tuple_bookmark });
        }
        Ok(FactFeed { tuples: page, bookmark: last_bookmark })
    }

    async fn which_exist(
        &self,
        references: &[FactReference],
    ) -> StorageResult<Vec<FactReference>> {
        let graph = self.graph.read().expect("memory graph lock is poisoned");
        Ok(references
            .iter()
            .filter(|reference| graph.by_reference.contains_key(*reference))
            .cloned()
            .collect())
    }

    async fn load(&self, references: &[FactReference]) -> StorageResult<Vec<FactEnvelope>> {
        let graph = self.graph.read().expect("memory graph lock is poisoned");
        let mut ids = BTreeSet::new();
        for reference in references {
            if let Some(&id) = graph.by_reference.get(reference) {
                ids.insert(id);
                ids.extend(graph.facts[&id].ancestors.iter().copied());
            }
        }
        // Ascending id is a topological order: predecessors are always
        // stored before their successors.
        Ok(ids
            .into_iter()
            .map(|id| {
                let stored = &graph.facts[&id];
                FactEnvelope {
                    fact: stored.record.clone(),
                    signatures: stored.signatures.clone(),
                }
            })
            .collect())
    }

    async fn purge(&self, conditions: &[Specification]) -> StorageResult<u64> {
        let mut purged = 0;
        for condition in conditions {
            let root_type = match condition.given.first() {
                Some(label) => label.fact_type.clone(),
                None => continue,
            };
            let roots: Vec<i64> = {
                let graph = self.graph.read().expect("memory graph lock is poisoned");
                graph
                    .facts
                    .values()
                    .filter(|stored| stored.record.fact_type == root_type)
                    .map(|stored| stored.id)
                    .collect()
            };
            for root in roots {
                purged += self.purge_root(condition, root)?;
            }
        }
        Ok(purged)
    }

    async fn purge_descendants(
        &self,
        purge_root: &FactReference,
        triggers: &[FactReference],
    ) -> StorageResult<u64> {
        let mut graph = self.graph.write().expect("memory graph lock is poisoned");
        let Some(&root_id) = graph.by_reference.get(purge_root) else {
            return Ok(0);
        };
        let trigger_ids: BTreeSet<i64> = triggers
            .iter()
            .filter_map(|reference| graph.by_reference.get(reference).copied())
            .collect();
        if trigger_ids.is_empty() {
            return Ok(0);
        }
        Ok(delete_descendants(&mut graph, root_id, &trigger_ids))
    }
}

impl MemoryStore {
    fn purge_root(&self, condition: &Specification, root: i64) -> StorageResult<u64> {
        let trigger_ids: BTreeSet<i64> = {
            let graph = self.graph.read().expect("memory graph lock is poisoned");
            let given_name = condition.given[0].name.clone();
            let tuple = BTreeMap::from([(given_name, root)]);
            let tuples = eval_matches(&graph, &tuple, &condition.matches)?;
            tuples
                .iter()
                .flat_map(|t| {
                    condition
                        .matches
                        .iter()
                        .filter_map(|m| t.get(&m.unknown.name).copied())
                        .collect::<Vec<_>>()
                })
                .collect()
        };
        if trigger_ids.is_empty() {
            return Ok(0);
        }
        let mut graph = self.graph.write().expect("memory graph lock is poisoned");
        Ok(delete_descendants(&mut graph, root, &trigger_ids))
    }
}

/// Deletes every descendant of `root` that is neither a trigger nor in a
/// trigger's ancestor set. The root itself is an ancestor of every trigger
/// chain, so it always survives.
fn delete_descendants(graph: &mut MemoryGraph, root: i64, triggers: &BTreeSet<i64>) -> u64 {
    let mut preserved: BTreeSet<i64> = triggers.clone();
    for trigger in triggers {
        if let Some(stored) = graph.facts.get(trigger) {
            preserved.extend(stored.ancestors.iter().copied());
        }
    }
    let targets: Vec<i64> = graph
        .facts
        .values()
        .filter(|stored| stored.ancestors.contains(&root) && !preserved.contains(&stored.id))
        .map(|stored| stored.id)
        .collect();
    for id in &targets {
        if let Some(stored) = graph.facts.remove(id) {
            graph.by_reference.remove(&stored.record.reference());
        }
        graph.successors.remove(id);
    }
    for edges in graph.successors.values_mut() {
        edges.retain(|edge| !targets.contains(&edge.successor));
    }
    u64::try_from(targets.len()).unwrap_or(0)
}

fn merge_signatures(existing: &mut Vec<FactSignature>, incoming: Vec<FactSignature>) {
    for signature in incoming {
        if !existing.contains(&signature) {
            existing.push(signature);
        }
    }
}

type Tuple = BTreeMap<String, i64>;

fn initial_tuple(
    graph: &MemoryGraph,
    given: &[Label],
    start: &[FactReference],
) -> Option<Tuple> {
    let mut tuple = Tuple::new();
    for (label, reference) in given.iter().zip(start) {
        tuple.insert(label.name.clone(), *graph.by_reference.get(reference)?);
    }
    Some(tuple)
}

fn references_of(graph: &MemoryGraph, tuple: &Tuple) -> ReferencesByName {
    tuple
        .iter()
        .map(|(name, id)| (name.clone(), graph.facts[id].record.reference()))
        .collect()
}

fn sort_tuples(tuples: &mut [Tuple], outputs: &[&str]) {
    tuples.sort_by_key(|tuple| {
        outputs
            .iter()
            .filter_map(|name| tuple.get(*name).copied())
            .collect::<Vec<i64>>()
    });
}

/// Evaluates matches against the graph, binding one unknown at a time.
/// Path conditions generate and filter candidates; existential conditions
/// keep a candidate when the nested matches do (or do not) produce tuples.
fn eval_matches(
    graph: &MemoryGraph,
    initial: &Tuple,
    matches: &[Match],
) -> StorageResult<Vec<Tuple>> {
    let mut tuples = vec![initial.clone()];
    for m in matches {
        let mut next = Vec::new();
        for tuple in &tuples {
            let mut candidates: Option<BTreeSet<i64>> = None;
            let mut existentials = Vec::new();
            for condition in &m.conditions {
                match condition {
                    Condition::Path(path) => {
                        let found = eval_path(graph, tuple, &m.unknown, path)?;
                        candidates = Some(match candidates {
                            None => found,
                            Some(bound) => bound.intersection(&found).copied().collect(),
                        });
                    }
                    Condition::Existential(existential) => existentials.push(existential),
                }
            }
            let candidates = candidates.unwrap_or_default();
            'candidate: for candidate in candidates {
                let mut extended = tuple.clone();
                extended.insert(m.unknown.name.clone(), candidate);
                for existential in &existentials {
                    let sub = eval_matches(graph, &extended, &existential.matches)?;
                    if sub.is_empty() == existential.exists {
                        continue 'candidate;
                    }
                }
                next.push(extended);
            }
        }
        tuples = next;
    }
    Ok(tuples)
}

/// Walks a path condition: up from the bound right-hand label along
/// predecessor references, then down to the unknown along successor edges.
fn eval_path(
    graph: &MemoryGraph,
    tuple: &Tuple,
    unknown: &Label,
    path: &PathCondition,
) -> StorageResult<BTreeSet<i64>> {
    let start = *tuple
        .get(&path.label_right)
        .ok_or_else(|| {
            StorageError::Compiler(tether_compiler::CompilerError::UnknownLabel(
                path.label_right.clone(),
            ))
        })?;

    let mut current = BTreeSet::from([start]);
    for role in &path.roles_right {
        let mut up = BTreeSet::new();
        for id in &current {
            let record = &graph.facts[id].record;
            if let Some(collection) = record.predecessors.get(&role.name) {
                for reference in collection.references() {
                    if reference.fact_type == role.predecessor_type {
                        if let Some(&predecessor_id) = graph.by_reference.get(reference) {
                            up.insert(predecessor_id);
                        }
                    }
                }
            }
        }
        current = up;
    }

    // The successor types of the downward walk, from the meeting point back
    // to the unknown.
    let mut successor_types = Vec::new();
    let mut walk_type = unknown.fact_type.clone();
    for role in &path.roles_left {
        successor_types.push((role.name.clone(), walk_type.clone()));
        walk_type = role.predecessor_type.clone();
    }
    for (role_name, successor_type) in successor_types.iter().rev() {
        let mut down = BTreeSet::new();
        for id in &current {
            if let Some(edges) = graph.successors.get(id) {
                for edge in edges {
                    if edge.role == *role_name
                        && graph.facts[&edge.successor].record.fact_type == *successor_type
                    {
                        down.insert(edge.successor);
                    }
                }
            }
        }
        current = down;
    }

    current.retain(|id| graph.facts[id].record.fact_type == unknown.fact_type);
    // Over-constrained paths intersect with the existing binding.
    if let Some(&bound) = tuple.get(&unknown.name) {
        current.retain(|id| *id == bound);
    }
    Ok(current)
}

fn project(
    graph: &MemoryGraph,
    tuple: &Tuple,
    projection: &Projection,
    own_labels: &[String],
) -> StorageResult<Value> {
    match projection {
        Projection::Field { label, field } => {
            let fact = fact_of(graph, tuple, label)?;
            Ok(fact.record.fields.get(field).cloned().unwrap_or(Value::Null))
        }
        Projection::Hash { label } => {
            Ok(Value::String(fact_of(graph, tuple, label)?.record.hash.clone()))
        }
        Projection::Time { label } => {
            Ok(Value::String(fact_of(graph, tuple, label)?.date_learned.to_rfc3339()))
        }
        Projection::Fact { label } => {
            let fact = fact_of(graph, tuple, label)?;
            Ok(serde_json::to_value(&fact.record).expect("fact records serialize"))
        }
        Projection::Specification(child) => {
            let child_labels: Vec<String> =
                child.matches.iter().map(|m| m.unknown.name.clone()).collect();
            let mut child_tuples = eval_matches(graph, tuple, &child.matches)?;
            let outputs: Vec<&str> = child_labels.iter().map(String::as_str).collect();
            sort_tuples(&mut child_tuples, &outputs);
            let mut values = Vec::with_capacity(child_tuples.len());
            for child_tuple in child_tuples {
                values.push(project(graph, &child_tuple, &child.projection, &child_labels)?);
            }
            Ok(Value::Array(values))
        }
        Projection::Composite { components } => {
            if components.is_empty() {
                let mut object = Map::new();
                for label in own_labels {
                    if let Some(id) = tuple.get(label) {
                        object.insert(
                            label.clone(),
                            Value::Object(graph.facts[id].record.fields.clone()),
                        );
                    }
                }
                return Ok(Value::Object(object));
            }
            let mut object = Map::new();
            for component in components {
                object.insert(
                    component.name.clone(),
                    project(graph, tuple, &component.projection, own_labels)?,
                );
            }
            Ok(Value::Object(object))
        }
    }
}

fn fact_of<'a>(
    graph: &'a MemoryGraph,
    tuple: &Tuple,
    label: &str,
) -> StorageResult<&'a StoredFact> {
    let id = tuple.get(label).ok_or_else(|| {
        StorageError::Compiler(tether_compiler::CompilerError::UnknownLabel(label.to_string()))
    })?;
    Ok(&graph.facts[id])
}
