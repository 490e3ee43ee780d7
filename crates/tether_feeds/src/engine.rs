use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use tether_authorization::{DistributedFactCache, DistributionEngine, DistributionRules};
use tether_compiler::{build_feeds, validate_given, FeedDefinition};
use tether_model::fact::FactReference;
use tether_model::results::ReferencesByName;
use tether_model::specification::Specification;
use tether_storage::Store;
use tracing::{debug, instrument};

use crate::errors::{FeedError, FeedResult};

#[cfg(test)]
#[path = "engine_test.rs"]
mod engine_test;

pub const DEFAULT_PAGE_SIZE: i64 = 100;

struct RegisteredFeed {
    definition: FeedDefinition,
    start: Vec<FactReference>,
}

/// One page of a poll: the distinct references delivered and the bookmark
/// to resume from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedPage {
    pub references: Vec<FactReference>,
    pub bookmark: String,
}

pub struct FeedEngine {
    store: Arc<dyn Store>,
    distribution: Arc<DistributionRules>,
    distributed: Arc<DistributedFactCache>,
    registered: DashMap<String, RegisteredFeed>,
}

impl FeedEngine {
    pub fn new(
        store: Arc<dyn Store>,
        distribution: Arc<DistributionRules>,
        distributed: Arc<DistributedFactCache>,
    ) -> Self {
        Self { store, distribution, distributed, registered: DashMap::new() }
    }

    /// Splits the specification into feeds, checks distribution for the
    /// requesting user, and registers each feed under its content address.
    #[instrument(skip_all, err)]
    pub async fn register_feeds(
        &self,
        specification: &Specification,
        start: &[FactReference],
        user: Option<&FactReference>,
    ) -> FeedResult<Vec<String>> {
        validate_given(&specification.given, start)?;
        let feeds = build_feeds(specification);
        let named_start: ReferencesByName = specification
            .given
            .iter()
            .zip(start)
            .map(|(label, reference)| (label.name.clone(), reference.clone()))
            .collect();
        DistributionEngine::new(&self.distribution, self.store.as_ref())
            .can_distribute_to_all(&feeds, &named_start, user)
            .await?;

        let mut hashes = Vec::with_capacity(feeds.len());
        for definition in feeds {
            let hash = definition.feed_hash(start);
            self.registered.insert(
                hash.clone(),
                RegisteredFeed { definition, start: start.to_vec() },
            );
            hashes.push(hash);
        }
        debug!(feeds = hashes.len(), "feeds registered");
        Ok(hashes)
    }

    /// Serves one page strictly after `bookmark`. Every delivered
    /// reference is recorded in the distributed-fact cache so a subsequent
    /// load by the same user passes distribution.
    #[instrument(skip(self, user), err)]
    pub async fn poll(
        &self,
        feed_hash: &str,
        bookmark: &str,
        limit: i64,
        user: Option<&FactReference>,
    ) -> FeedResult<FeedPage> {
        let (definition, start) = {
            let registered = self
                .registered
                .get(feed_hash)
                .ok_or_else(|| FeedError::UnknownFeed(feed_hash.to_string()))?;
            (registered.definition.clone(), registered.start.clone())
        };

        let page = self.store.feed(&definition, &start, bookmark, limit).await?;
        let references: Vec<FactReference> = page
            .tuples
            .iter()
            .flat_map(|tuple| tuple.facts.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        self.distributed.add(&references, user);

        Ok(FeedPage { references, bookmark: page.bookmark })
    }
}
