//! Splits a specification into feed fragments.
//!
//! A feed is a tuple stream: it can only ever add tuples, so a negative
//! existential cannot be replayed the way a read applies it. The split
//! produces, for every negative existential, one feed that carries just
//! that negation (at most one per feed, nested one level deep) and one
//! trigger feed that streams the tuples satisfying the negated matches, so
//! a subscriber can retract. Positive existentials stay in place; deeper
//! negations inside them are dropped from the feed variant, which may
//! over-deliver but never under-delivers.

use serde::Serialize;
use tether_model::canonical::url_safe_hash;
use tether_model::fact::FactReference;
use tether_model::specification::{
    Condition,
    ExistentialCondition,
    Label,
    Match,
    Projection,
    Specification,
};

#[cfg(test)]
#[path = "feeds_test.rs"]
mod feeds_test;

/// One fragment of a specification: the given labels and the matches that
/// produce its tuples. The projection is irrelevant to a feed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FeedDefinition {
    pub given: Vec<Label>,
    pub matches: Vec<Match>,
}

impl FeedDefinition {
    /// Content address of this feed for a particular start tuple: the
    /// URL-safe base64 SHA-512 of the canonical feed object. The start
    /// references participate, so the same shape over different givens
    /// yields different feeds.
    pub fn feed_hash(&self, start: &[FactReference]) -> String {
        #[derive(Serialize)]
        struct CanonicalFeed<'a> {
            definition: &'a FeedDefinition,
            start: &'a [FactReference],
        }
        let canonical = serde_json::to_string(&CanonicalFeed { definition: self, start })
            .expect("feed definitions serialize");
        url_safe_hash(canonical.as_bytes())
    }

    pub fn to_specification(&self) -> Specification {
        Specification {
            given: self.given.clone(),
            matches: self.matches.clone(),
            projection: Projection::Composite { components: Vec::new() },
        }
    }
}

/// Decomposes a specification into feeds whose union covers its results.
pub fn build_feeds(specification: &Specification) -> Vec<FeedDefinition> {
    let mut feeds = Vec::new();
    let mut prefix: Vec<Match> = Vec::new();
    let mut last_match_had_negative = false;

    for m in &specification.matches {
        let paths: Vec<Condition> =
            m.conditions.iter().filter(|c| matches!(c, Condition::Path(_))).cloned().collect();
        let mut kept = paths.clone();
        last_match_had_negative = false;

        for condition in &m.conditions {
            if let Condition::Existential(existential) = condition {
                if existential.exists {
                    kept.push(Condition::Existential(ExistentialCondition {
                        exists: true,
                        matches: strip_negations(&existential.matches),
                    }));
                } else {
                    last_match_had_negative = true;
                    // The fragment that applies this one negation.
                    let mut with_negation = prefix.clone();
                    let mut conditions = paths.clone();
                    conditions.push(Condition::Existential(ExistentialCondition {
                        exists: false,
                        matches: strip_negations(&existential.matches),
                    }));
                    with_negation.push(Match::new(m.unknown.clone(), conditions));
                    feeds.push(FeedDefinition {
                        given: specification.given.clone(),
                        matches: with_negation,
                    });
                    // The trigger fragment: tuples that invalidate the one
                    // above.
                    let mut trigger = prefix.clone();
                    trigger.push(Match::new(m.unknown.clone(), paths.clone()));
                    trigger.extend(strip_negations(&existential.matches));
                    feeds.push(FeedDefinition {
                        given: specification.given.clone(),
                        matches: trigger,
                    });
                }
            }
        }
        prefix.push(Match::new(m.unknown.clone(), kept));
    }

    // The full-tuple fragment, unless the last match's negation feed
    // already spans every match.
    if !last_match_had_negative {
        feeds.push(FeedDefinition { given: specification.given.clone(), matches: prefix });
    }
    feeds
}

/// Keeps path conditions and positive existentials; negations are removed.
fn strip_negations(matches: &[Match]) -> Vec<Match> {
    matches
        .iter()
        .map(|m| {
            let conditions = m
                .conditions
                .iter()
                .filter_map(|condition| match condition {
                    Condition::Path(_) => Some(condition.clone()),
                    Condition::Existential(existential) if existential.exists => {
                        Some(Condition::Existential(ExistentialCondition {
                            exists: true,
                            matches: strip_negations(&existential.matches),
                        }))
                    }
                    Condition::Existential(_) => None,
                })
                .collect();
            Match::new(m.unknown.clone(), conditions)
        })
        .collect()
}
