//! Core types of the fact graph: immutable fact records addressed by the
//! hash of their canonical form, signature envelopes, and the specification
//! AST that queries are expressed in.

pub mod canonical;
pub mod fact;
pub mod graph;
pub mod identity;
pub mod results;
pub mod specification;

pub use canonical::{canonical_form, hash_canonical, url_safe_hash};
pub use fact::{FactEnvelope, FactRecord, FactReference, FactSignature, PredecessorCollection};
pub use graph::{sort_topologically, GraphError, TopologicalBatch};
pub use results::{FactFeed, FeedTuple, ProjectedResult, ReferencesByName};
pub use specification::{
    Condition,
    ExistentialCondition,
    Label,
    Match,
    NamedProjection,
    PathCondition,
    Projection,
    Role,
    Specification,
    SpecificationProjection,
};
