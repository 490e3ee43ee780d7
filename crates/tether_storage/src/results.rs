//! Reassembles flat row sets into nested projected results.
//!
//! Each query of the tree returns rows keyed by fact index. Rows are
//! ordered by the fact ids of their outputs, and a child query shares its
//! leading outputs with its parent, so attaching child results to parent
//! rows is a single linear merge over the common id prefix.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tether_compiler::{SpecificationSqlQuery, SqlQueryTree};
use tether_model::fact::FactReference;
use tether_model::results::{ProjectedResult, ReferencesByName};
use tether_model::specification::Projection;

use crate::errors::{StorageError, StorageResult};

#[cfg(test)]
#[path = "results_test.rs"]
mod results_test;

/// One labeled fact of a result row.
#[derive(Clone, Debug, PartialEq)]
pub struct ResultSetFact {
    pub hash: String,
    pub fact_id: i64,
    /// The stored record: `{"fields": …, "predecessors": …}`.
    pub data: Value,
    pub date_learned: DateTime<Utc>,
}

/// A result row: fact index to labeled fact.
pub type ResultSetRow = HashMap<usize, ResultSetFact>;

/// The row sets of one query tree, in the same shape as the tree.
#[derive(Clone, Debug, Default)]
pub struct RowSetTree {
    pub rows: Vec<ResultSetRow>,
    pub children: Vec<(String, RowSetTree)>,
}

/// Collects the references of every `fact` projection in the tree so the
/// caller can load the records once and pass them to [`compose`].
pub fn find_fact_references(tree: &SqlQueryTree, rows: &RowSetTree) -> Vec<FactReference> {
    let mut references = BTreeSet::new();
    collect_fact_references(tree, rows, &mut references);
    references.into_iter().collect()
}

fn collect_fact_references(
    tree: &SqlQueryTree,
    rows: &RowSetTree,
    references: &mut BTreeSet<FactReference>,
) {
    if let Some(query) = &tree.query {
        collect_projection_references(&tree.projection, query, &rows.rows, references);
    }
    for ((_, child_tree), (_, child_rows)) in tree.children.iter().zip(&rows.children) {
        collect_fact_references(child_tree, child_rows, references);
    }
}

fn collect_projection_references(
    projection: &Projection,
    query: &SpecificationSqlQuery,
    rows: &[ResultSetRow],
    references: &mut BTreeSet<FactReference>,
) {
    match projection {
        Projection::Fact { label } => {
            if let Some(label) = query.labels.iter().find(|l| &l.name == label) {
                for row in rows {
                    if let Some(fact) = row.get(&label.fact_index) {
                        references.insert(FactReference::new(
                            label.fact_type.clone(),
                            fact.hash.clone(),
                        ));
                    }
                }
            }
        }
        Projection::Composite { components } => {
            for component in components {
                collect_projection_references(&component.projection, query, rows, references);
            }
        }
        // Child specifications are handled by their own tree node.
        _ => {}
    }
}

/// Composes the row sets of a query tree into projected results, merged
/// with the fixed given tuple. `records` carries the loaded records for
/// `fact` projections.
pub fn compose(
    tree: &SqlQueryTree,
    rows: &RowSetTree,
    given_tuple: &ReferencesByName,
    records: &HashMap<FactReference, Value>,
) -> StorageResult<Vec<ProjectedResult>> {
    let composed = compose_level(tree, rows, given_tuple, records)?;
    Ok(composed
        .into_iter()
        .map(|row| ProjectedResult { tuple: row.tuple, value: row.value })
        .collect())
}

struct ComposedRow {
    identifier: Vec<i64>,
    tuple: ReferencesByName,
    value: Value,
}

fn compose_level(
    tree: &SqlQueryTree,
    rows: &RowSetTree,
    given_tuple: &ReferencesByName,
    records: &HashMap<FactReference, Value>,
) -> StorageResult<Vec<ComposedRow>> {
    let Some(query) = &tree.query else {
        return Ok(Vec::new());
    };

    // Compose children first; each child's identifier extends the parent's.
    let mut children: Vec<(String, Vec<ComposedRow>, usize, usize)> = Vec::new();
    for ((name, child_tree), (_, child_rows)) in tree.children.iter().zip(&rows.children) {
        let composed = compose_level(child_tree, child_rows, given_tuple, records)?;
        children.push((name.clone(), composed, child_tree.parent_output_count, 0));
    }

    let mut results = Vec::with_capacity(rows.rows.len());
    for row in &rows.rows {
        let identifier: Vec<i64> = query
            .output_fact_indexes
            .iter()
            .filter_map(|fact_index| row.get(fact_index).map(|fact| fact.fact_id))
            .collect();

        let mut tuple = given_tuple.clone();
        for label in &query.labels {
            if let Some(fact) = row.get(&label.fact_index) {
                tuple.insert(
                    label.name.clone(),
                    FactReference::new(label.fact_type.clone(), fact.hash.clone()),
                );
            }
        }

        // Advance each child cursor across the shared prefix. Both sides
        // are sorted on it, so this never backtracks.
        let mut child_values: HashMap<&str, Vec<Value>> = HashMap::new();
        for (name, composed, prefix_length, cursor) in &mut children {
            let prefix = &identifier[..(*prefix_length).min(identifier.len())];
            while *cursor < composed.len()
                && composed[*cursor].identifier[..prefix.len()] < *prefix
            {
                *cursor += 1;
            }
            let mut values = Vec::new();
            let mut position = *cursor;
            while position < composed.len()
                && composed[position].identifier[..prefix.len()] == *prefix
            {
                values.push(composed[position].value.clone());
                position += 1;
            }
            child_values.insert(name.as_str(), values);
        }

        let value = project(
            &tree.projection,
            query,
            row,
            tree.parent_output_count,
            &child_values,
            records,
        )?;
        results.push(ComposedRow { identifier, tuple, value });
    }
    Ok(results)
}

fn project(
    projection: &Projection,
    query: &SpecificationSqlQuery,
    row: &ResultSetRow,
    parent_output_count: usize,
    child_values: &HashMap<&str, Vec<Value>>,
    records: &HashMap<FactReference, Value>,
) -> StorageResult<Value> {
    match projection {
        Projection::Field { label, field } => {
            let fact = labeled_fact(query, row, label)?;
            Ok(fact.data.get("fields").and_then(|fields| fields.get(field)).cloned()
                .unwrap_or(Value::Null))
        }
        Projection::Hash { label } => {
            Ok(Value::String(labeled_fact(query, row, label)?.hash.clone()))
        }
        Projection::Time { label } => {
            Ok(Value::String(labeled_fact(query, row, label)?.date_learned.to_rfc3339()))
        }
        Projection::Fact { label } => {
            let reference = labeled_reference(query, row, label)?;
            records
                .get(&reference)
                .cloned()
                .ok_or(StorageError::MissingFact(reference))
        }
        Projection::Specification(_) => {
            // The compiler registers a root-level child specification under
            // the empty name.
            Ok(Value::Array(child_values.get("").cloned().unwrap_or_default()))
        }
        Projection::Composite { components } => {
            if components.is_empty() {
                return Ok(own_fields(query, row, parent_output_count));
            }
            let mut object = Map::new();
            for component in components {
                let value = match &component.projection {
                    Projection::Specification(_) => Value::Array(
                        child_values.get(component.name.as_str()).cloned().unwrap_or_default(),
                    ),
                    singular => project(
                        singular,
                        query,
                        row,
                        parent_output_count,
                        child_values,
                        records,
                    )?,
                };
                object.insert(component.name.clone(), value);
            }
            Ok(Value::Object(object))
        }
    }
}

/// The default shape of an empty composite: each of this level's own
/// outputs contributes its fields under its label name.
fn own_fields(query: &SpecificationSqlQuery, row: &ResultSetRow, parent_output_count: usize) -> Value {
    let mut object = Map::new();
    let own_outputs = &query.output_fact_indexes[parent_output_count.min(query.output_fact_indexes.len())..];
    for fact_index in own_outputs {
        let Some(fact) = row.get(fact_index) else { continue };
        let Some(label) = query.labels.iter().find(|l| l.fact_index == *fact_index) else {
            continue;
        };
        object.insert(
            label.name.clone(),
            fact.data.get("fields").cloned().unwrap_or(Value::Object(Map::new())),
        );
    }
    Value::Object(object)
}

fn labeled_fact<'a>(
    query: &SpecificationSqlQuery,
    row: &'a ResultSetRow,
    label: &str,
) -> StorageResult<&'a ResultSetFact> {
    let description = query
        .labels
        .iter()
        .find(|l| l.name == label)
        .ok_or_else(|| StorageError::Compiler(tether_compiler::CompilerError::UnknownLabel(label.to_string())))?;
    row.get(&description.fact_index).ok_or_else(|| {
        StorageError::MissingFact(FactReference::new(description.fact_type.clone(), ""))
    })
}

fn labeled_reference(
    query: &SpecificationSqlQuery,
    row: &ResultSetRow,
    label: &str,
) -> StorageResult<FactReference> {
    let description = query
        .labels
        .iter()
        .find(|l| l.name == label)
        .ok_or_else(|| StorageError::Compiler(tether_compiler::CompilerError::UnknownLabel(label.to_string())))?;
    let fact = row.get(&description.fact_index).ok_or_else(|| {
        StorageError::MissingFact(FactReference::new(description.fact_type.clone(), ""))
    })?;
    Ok(FactReference::new(description.fact_type.clone(), fact.hash.clone()))
}
