use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fact::FactReference;

/// The labeled fact references that identify one result row.
pub type ReferencesByName = BTreeMap<String, FactReference>;

/// One projected row of a read, carrying both the projection value and the
/// tuple of references it was derived from.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProjectedResult {
    pub tuple: ReferencesByName,
    pub value: Value,
}

/// One tuple of a feed page. The bookmark addresses this tuple; polling
/// with it resumes strictly after the tuple.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedTuple {
    pub facts: Vec<FactReference>,
    pub bookmark: String,
}

/// One page of a feed, with the bookmark to poll from next. An empty page
/// carries the caller's bookmark unchanged.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactFeed {
    pub tuples: Vec<FeedTuple>,
    pub bookmark: String,
}
