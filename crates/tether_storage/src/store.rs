use async_trait::async_trait;
use tether_compiler::FeedDefinition;
use tether_model::fact::{FactEnvelope, FactReference};
use tether_model::results::{FactFeed, ProjectedResult};
use tether_model::specification::Specification;

use crate::errors::StorageResult;

/// Persistence of the fact graph. Two implementations: the Postgres store
/// and an in-memory store that evaluates specifications directly.
///
/// Saving is idempotent: the returned envelopes are exactly the facts that
/// were new to the store, so saving the same batch twice returns an empty
/// second result.
#[async_trait]
pub trait Store: Send + Sync {
    /// Persists a batch transactionally: facts, edges, the ancestor
    /// closure, and signatures commit together. The batch is reordered so
    /// predecessors precede successors; a predecessor that is neither in
    /// the batch nor already stored fails the whole batch.
    async fn save(&self, envelopes: Vec<FactEnvelope>) -> StorageResult<Vec<FactEnvelope>>;

    /// Runs a specification from the given start tuple and composes the
    /// projected results. An unsatisfiable specification returns the empty
    /// list.
    async fn read(
        &self,
        start: &[FactReference],
        specification: &Specification,
    ) -> StorageResult<Vec<ProjectedResult>>;

    /// Returns one page of a feed, strictly after the bookmark.
    async fn feed(
        &self,
        feed: &FeedDefinition,
        start: &[FactReference],
        bookmark: &str,
        limit: i64,
    ) -> StorageResult<FactFeed>;

    /// The subset of `references` that exist in the store.
    async fn which_exist(
        &self,
        references: &[FactReference],
    ) -> StorageResult<Vec<FactReference>>;

    /// Loads the referenced facts together with their full ancestor
    /// closures, predecessors first, with their surviving signatures.
    async fn load(&self, references: &[FactReference]) -> StorageResult<Vec<FactEnvelope>>;

    /// After-the-fact purge: evaluates every condition over all current
    /// purge roots and deletes the descendants outside trigger lineage.
    /// Returns the number of facts removed.
    async fn purge(&self, conditions: &[Specification]) -> StorageResult<u64>;

    /// Real-time purge of a single root whose triggers are already known.
    async fn purge_descendants(
        &self,
        purge_root: &FactReference,
        triggers: &[FactReference],
    ) -> StorageResult<u64>;
}
