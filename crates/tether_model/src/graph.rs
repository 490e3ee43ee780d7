use std::collections::{BTreeSet, HashMap, VecDeque};

use thiserror::Error;

use crate::fact::{FactRecord, FactReference};

#[cfg(test)]
#[path = "graph_test.rs"]
mod graph_test;

#[derive(Debug, Error)]
pub enum GraphError {
    /// Predecessors are fixed at hash time, so a well-formed batch is a DAG.
    /// A cycle can only come from a crafted request.
    #[error("batch contains a predecessor cycle involving fact of type {0}")]
    Cycle(String),
}

/// A batch reordered so that every predecessor precedes its successors,
/// along with the references the batch expects to already exist.
#[derive(Debug)]
pub struct TopologicalBatch {
    pub facts: Vec<FactRecord>,
    pub external: Vec<FactReference>,
}

/// Kahn's algorithm over the in-batch predecessor edges. References that
/// point outside the batch are collected in `external`; the save path
/// checks those against the store and fails the batch if any is missing.
pub fn sort_topologically(facts: Vec<FactRecord>) -> Result<TopologicalBatch, GraphError> {
    let index_of: HashMap<FactReference, usize> =
        facts.iter().enumerate().map(|(i, fact)| (fact.reference(), i)).collect();

    let mut in_degree = vec![0usize; facts.len()];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); facts.len()];
    let mut external = BTreeSet::new();

    for (successor, fact) in facts.iter().enumerate() {
        for reference in fact.predecessor_references() {
            match index_of.get(&reference) {
                Some(&predecessor) => {
                    successors[predecessor].push(successor);
                    in_degree[successor] += 1;
                }
                None => {
                    external.insert(reference);
                }
            }
        }
    }

    let mut queue: VecDeque<usize> =
        (0..facts.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(facts.len());
    while let Some(i) = queue.pop_front() {
        order.push(i);
        for &successor in &successors[i] {
            in_degree[successor] -= 1;
            if in_degree[successor] == 0 {
                queue.push_back(successor);
            }
        }
    }

    if order.len() != facts.len() {
        let stuck = in_degree
            .iter()
            .position(|&d| d > 0)
            .map(|i| facts[i].fact_type.clone())
            .unwrap_or_default();
        return Err(GraphError::Cycle(stuck));
    }

    let mut slots: Vec<Option<FactRecord>> = facts.into_iter().map(Some).collect();
    let sorted = order
        .into_iter()
        .map(|i| slots[i].take().expect("each index appears once in a topological order"))
        .collect();

    Ok(TopologicalBatch { facts: sorted, external: external.into_iter().collect() })
}
