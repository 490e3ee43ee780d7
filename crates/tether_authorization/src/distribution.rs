//! Read distribution.
//!
//! A share rule names a specification whose feeds a user may receive, and
//! either opens it to everyone or guards it with a user specification: the
//! requesting user's fact must appear in its results. A requested feed is
//! matched against the shared specifications by feed shape.

use tether_compiler::{build_feeds, FeedDefinition};
use tether_model::fact::FactReference;
use tether_model::results::ReferencesByName;
use tether_model::specification::Specification;
use tether_storage::Store;
use tracing::{debug, instrument};

use crate::errors::{AuthorizationError, AuthorizationResult};

#[cfg(test)]
#[path = "distribution_test.rs"]
mod distribution_test;

struct Share {
    feeds: Vec<FeedDefinition>,
    user_specification: Option<Specification>,
    everyone: bool,
}

#[derive(Default)]
pub struct DistributionRules {
    shares: Vec<Share>,
}

impl DistributionRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn share(self, specification: Specification) -> ShareBuilder {
        ShareBuilder { rules: self, specification }
    }
}

pub struct ShareBuilder {
    rules: DistributionRules,
    specification: Specification,
}

impl ShareBuilder {
    /// Distribute to any user whose fact appears in the results of
    /// `user_specification`.
    pub fn with(mut self, user_specification: Specification) -> DistributionRules {
        self.rules.shares.push(Share {
            feeds: build_feeds(&self.specification),
            user_specification: Some(user_specification),
            everyone: false,
        });
        self.rules
    }

    pub fn with_everyone(mut self) -> DistributionRules {
        self.rules.shares.push(Share {
            feeds: build_feeds(&self.specification),
            user_specification: None,
            everyone: true,
        });
        self.rules
    }
}

pub struct DistributionEngine<'a> {
    rules: &'a DistributionRules,
    store: &'a dyn Store,
}

impl<'a> DistributionEngine<'a> {
    pub fn new(rules: &'a DistributionRules, store: &'a dyn Store) -> Self {
        Self { rules, store }
    }

    /// Checks every requested feed; the first uncovered or unauthorized
    /// feed fails the whole request with `Forbidden`.
    #[instrument(skip_all, fields(feeds = feeds.len()), err)]
    pub async fn can_distribute_to_all(
        &self,
        feeds: &[FeedDefinition],
        named_start: &ReferencesByName,
        user: Option<&FactReference>,
    ) -> AuthorizationResult<()> {
        for feed in feeds {
            self.can_distribute(feed, named_start, user).await?;
        }
        Ok(())
    }

    async fn can_distribute(
        &self,
        feed: &FeedDefinition,
        named_start: &ReferencesByName,
        user: Option<&FactReference>,
    ) -> AuthorizationResult<()> {
        let mut guarded_reason = None;
        for share in &self.rules.shares {
            if !share.feeds.iter().any(|candidate| {
                candidate.given == feed.given && candidate.matches == feed.matches
            }) {
                continue;
            }
            if share.everyone {
                return Ok(());
            }
            let specification = share
                .user_specification
                .as_ref()
                .expect("a guarded share carries a user specification");
            let Some(user) = user else {
                guarded_reason = Some("an authenticated user is required".to_string());
                continue;
            };
            let Some(start) = start_for(specification, named_start) else {
                guarded_reason =
                    Some("the request does not bind the share's given facts".to_string());
                continue;
            };
            let results = self.store.read(&start, specification).await?;
            let permitted =
                results.iter().any(|result| result.tuple.values().any(|r| r == user));
            if permitted {
                return Ok(());
            }
            debug!("user does not satisfy the share's user specification");
            guarded_reason = Some("the user is not among the permitted readers".to_string());
        }
        Err(AuthorizationError::Forbidden(match guarded_reason {
            Some(reason) => reason,
            None => "no distribution rule covers this feed".to_string(),
        }))
    }
}

fn start_for(
    specification: &Specification,
    named_start: &ReferencesByName,
) -> Option<Vec<FactReference>> {
    specification
        .given
        .iter()
        .map(|label| named_start.get(&label.name).cloned())
        .collect()
}
