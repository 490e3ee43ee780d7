use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::canonical::{canonical_form, hash_canonical};

#[cfg(test)]
#[path = "fact_test.rs"]
mod fact_test;

/// Identity of a fact: its type and the hash of its canonical form.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FactReference {
    #[serde(rename = "type")]
    pub fact_type: String,
    pub hash: String,
}

impl FactReference {
    pub fn new(fact_type: impl Into<String>, hash: impl Into<String>) -> Self {
        Self { fact_type: fact_type.into(), hash: hash.into() }
    }
}

/// The predecessors of one role: a single reference or an ordered sequence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredecessorCollection {
    Single(FactReference),
    Multiple(Vec<FactReference>),
}

impl PredecessorCollection {
    pub fn references(&self) -> &[FactReference] {
        match self {
            PredecessorCollection::Single(reference) => std::slice::from_ref(reference),
            PredecessorCollection::Multiple(references) => references,
        }
    }
}

/// An immutable record of the graph. The hash is derived from the fields
/// and predecessors; two records with equal content are the same fact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactRecord {
    #[serde(rename = "type")]
    pub fact_type: String,
    pub hash: String,
    pub fields: Map<String, Value>,
    pub predecessors: BTreeMap<String, PredecessorCollection>,
}

impl FactRecord {
    /// Builds a record, deriving the hash from the canonical form.
    pub fn new(
        fact_type: impl Into<String>,
        fields: Map<String, Value>,
        predecessors: BTreeMap<String, PredecessorCollection>,
    ) -> Self {
        let hash = hash_canonical(&canonical_form(&fields, &predecessors));
        Self { fact_type: fact_type.into(), hash, fields, predecessors }
    }

    pub fn compute_hash(&self) -> String {
        hash_canonical(&canonical_form(&self.fields, &self.predecessors))
    }

    /// True when the stored hash matches the hash of the content.
    pub fn verify_hash(&self) -> bool {
        self.hash == self.compute_hash()
    }

    pub fn reference(&self) -> FactReference {
        FactReference { fact_type: self.fact_type.clone(), hash: self.hash.clone() }
    }

    /// Every predecessor reference, across all roles, in role order.
    pub fn predecessor_references(&self) -> Vec<FactReference> {
        self.predecessors
            .values()
            .flat_map(|collection| collection.references().iter().cloned())
            .collect()
    }
}

/// A signature over the canonical fact bytes, attributed to a PEM public key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactSignature {
    #[serde(rename = "publicKey")]
    pub public_key: String,
    pub signature: String,
}

/// A fact together with the signatures collected for it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactEnvelope {
    pub fact: FactRecord,
    pub signatures: Vec<FactSignature>,
}

impl FactEnvelope {
    pub fn unsigned(fact: FactRecord) -> Self {
        Self { fact, signatures: Vec::new() }
    }

    /// Quarantines a record whose supplied hash diverges from its content:
    /// the fact is kept, the signatures are dropped. Such a fact is never
    /// distributed as signed.
    pub fn sanitized(mut self) -> Self {
        if !self.fact.verify_hash() {
            self.signatures.clear();
        }
        self
    }
}
