//! Short-lived cache of distributed fact references.
//!
//! A reference enters the cache when a feed delivers it to a user;
//! subsequent loads by the same user consult the cache instead of
//! re-deriving the feeds. Entries expire after five minutes and the cache
//! is size-bounded, evicting oldest-first once full.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tether_model::fact::FactReference;

#[cfg(test)]
#[path = "cache_test.rs"]
mod cache_test;

const TIME_TO_LIVE: Duration = Duration::from_secs(300);
const DEFAULT_CAPACITY: usize = 10_000;

type Key = (FactReference, Option<FactReference>);

pub struct DistributedFactCache {
    entries: DashMap<Key, Instant>,
    capacity: usize,
}

impl Default for DistributedFactCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl DistributedFactCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { entries: DashMap::new(), capacity }
    }

    pub fn add(&self, references: &[FactReference], user: Option<&FactReference>) {
        let now = Instant::now();
        for reference in references {
            if self.entries.len() >= self.capacity {
                self.evict(now);
            }
            self.entries.insert((reference.clone(), user.cloned()), now);
        }
    }

    /// True when every reference was distributed to this user within the
    /// time to live.
    pub fn includes_all(&self, references: &[FactReference], user: Option<&FactReference>) -> bool {
        let now = Instant::now();
        references.iter().all(|reference| {
            self.entries
                .get(&(reference.clone(), user.cloned()))
                .is_some_and(|inserted| now.duration_since(*inserted) < TIME_TO_LIVE)
        })
    }

    /// Drops expired entries; if none were expired, drops the oldest.
    fn evict(&self, now: Instant) {
        let before = self.entries.len();
        self.entries.retain(|_, inserted| now.duration_since(*inserted) < TIME_TO_LIVE);
        if self.entries.len() < before {
            return;
        }
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| *entry.value())
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}
