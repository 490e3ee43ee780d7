use std::sync::Arc;

use tether_model::fact::{FactEnvelope, FactReference};
use tether_model::specification::{Condition, Match, Specification};
use tether_storage::Store;
use tracing::{debug, info, instrument};

use crate::errors::{PurgeError, PurgeResult};

#[cfg(test)]
#[path = "engine_test.rs"]
mod engine_test;

/// Purge conditions may only use path conditions: whether to purge cannot
/// itself depend on the absence or presence of further facts.
pub fn validate_purge_conditions(conditions: &[Specification]) -> PurgeResult<()> {
    for condition in conditions {
        if condition.given.len() != 1 {
            return Err(PurgeError::MalformedCondition);
        }
        if has_existential(&condition.matches) {
            return Err(PurgeError::ConditionalCondition(
                condition.given[0].fact_type.clone(),
            ));
        }
    }
    Ok(())
}

fn has_existential(matches: &[Match]) -> bool {
    matches.iter().any(|m| {
        m.conditions.iter().any(|condition| matches!(condition, Condition::Existential(_)))
    })
}

pub struct PurgeEngine {
    store: Arc<dyn Store>,
    conditions: Vec<Specification>,
}

impl PurgeEngine {
    pub fn new(store: Arc<dyn Store>, conditions: Vec<Specification>) -> PurgeResult<Self> {
        validate_purge_conditions(&conditions)?;
        Ok(Self { store, conditions })
    }

    /// After-the-fact purge: scans all current triggers and processes every
    /// affected root. Returns the number of facts removed.
    #[instrument(skip(self), err)]
    pub async fn purge(&self) -> PurgeResult<u64> {
        let purged = self.store.purge(&self.conditions).await?;
        info!(purged, "purge complete");
        Ok(purged)
    }

    /// Real-time purge: called after a batch is saved. A saved fact whose
    /// type matches a condition's trigger walks up to its purge roots, and
    /// only those roots are processed.
    #[instrument(skip_all, err)]
    pub async fn on_facts_saved(&self, saved: &[FactEnvelope]) -> PurgeResult<u64> {
        let mut purged = 0;
        for condition in &self.conditions {
            let trigger_types: Vec<&str> =
                condition.matches.iter().map(|m| m.unknown.fact_type.as_str()).collect();
            let root_type = &condition.given[0].fact_type;
            for envelope in saved {
                if !trigger_types.contains(&envelope.fact.fact_type.as_str()) {
                    continue;
                }
                // The roots are among the trigger's ancestors.
                let closure = self.store.load(&[envelope.fact.reference()]).await?;
                let roots: Vec<FactReference> = closure
                    .iter()
                    .filter(|loaded| &loaded.fact.fact_type == root_type)
                    .map(|loaded| loaded.fact.reference())
                    .collect();
                for root in roots {
                    purged += self.purge_one_root(condition, &root).await?;
                }
            }
        }
        Ok(purged)
    }

    async fn purge_one_root(
        &self,
        condition: &Specification,
        root: &FactReference,
    ) -> PurgeResult<u64> {
        let results = self.store.read(std::slice::from_ref(root), condition).await?;
        let triggers: Vec<FactReference> = results
            .iter()
            .flat_map(|result| {
                condition
                    .matches
                    .iter()
                    .filter_map(|m| result.tuple.get(&m.unknown.name).cloned())
                    .collect::<Vec<_>>()
            })
            .collect();
        if triggers.is_empty() {
            return Ok(0);
        }
        let purged = self.store.purge_descendants(root, &triggers).await?;
        debug!(root = %root.hash, purged, "purge root processed");
        Ok(purged)
    }
}
