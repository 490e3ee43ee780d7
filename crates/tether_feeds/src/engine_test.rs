use std::collections::BTreeMap;
use std::sync::Arc;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use serde_json::json;
use tether_authorization::{DistributedFactCache, DistributionRules};
use tether_compiler::parse_specification;
use tether_model::fact::{FactEnvelope, FactRecord, PredecessorCollection};
use tether_model::specification::Specification;
use tether_storage::{MemoryStore, Store};

use crate::engine::{FeedEngine, DEFAULT_PAGE_SIZE};
use crate::errors::FeedError;

fn successors_specification() -> Specification {
    parse_specification(
        "(root: Root) {
            s: Successor [
                s->predecessor: Root = root
            ]
        }",
    )
    .unwrap()
}

fn root_fact() -> FactRecord {
    FactRecord::new(
        "Root",
        json!({ "id": "r" }).as_object().unwrap().clone(),
        BTreeMap::new(),
    )
}

fn successor_of(root: &FactRecord, index: usize) -> FactRecord {
    FactRecord::new(
        "Successor",
        json!({ "index": index }).as_object().unwrap().clone(),
        BTreeMap::from([(
            "predecessor".to_string(),
            PredecessorCollection::Single(root.reference()),
        )]),
    )
}

fn engine_over(store: Arc<MemoryStore>) -> FeedEngine {
    let rules = DistributionRules::new().share(successors_specification()).with_everyone();
    FeedEngine::new(store, Arc::new(rules), Arc::new(DistributedFactCache::new()))
}

#[tokio::test]
async fn bookmarks_page_through_the_whole_feed() {
    let store = Arc::new(MemoryStore::new());
    let root = root_fact();
    let mut batch = vec![FactEnvelope::unsigned(root.clone())];
    for index in 0..5000 {
        batch.push(FactEnvelope::unsigned(successor_of(&root, index)));
    }
    store.save(batch).await.unwrap();

    let engine = engine_over(store);
    let hashes = engine
        .register_feeds(&successors_specification(), &[root.reference()], None)
        .await
        .unwrap();
    assert_eq!(hashes.len(), 1);

    let mut bookmark = String::new();
    let mut total = 0;
    for _ in 0..50 {
        let page =
            engine.poll(&hashes[0], &bookmark, DEFAULT_PAGE_SIZE, None).await.unwrap();
        assert!(page.references.len() <= 100);
        total += page.references.len();
        // Bookmarks advance strictly, compared as id tuples.
        assert!(
            tether_compiler::decode_bookmark(&page.bookmark).unwrap()
                > tether_compiler::decode_bookmark(&bookmark).unwrap()
        );
        bookmark = page.bookmark;
    }
    assert_eq!(total, 5000);

    // Exhausted: the bookmark stops advancing.
    let done = engine.poll(&hashes[0], &bookmark, DEFAULT_PAGE_SIZE, None).await.unwrap();
    assert!(done.references.is_empty());
    assert_eq!(done.bookmark, bookmark);
}

#[tokio::test]
async fn polling_an_unknown_hash_fails() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_over(store);

    let result = engine.poll("no-such-feed", "", DEFAULT_PAGE_SIZE, None).await;
    assert_matches!(result, Err(FeedError::UnknownFeed(_)));
}

#[tokio::test]
async fn delivered_references_enter_the_distributed_cache() {
    let store = Arc::new(MemoryStore::new());
    let root = root_fact();
    let successor = successor_of(&root, 0);
    store
        .save(vec![
            FactEnvelope::unsigned(root.clone()),
            FactEnvelope::unsigned(successor.clone()),
        ])
        .await
        .unwrap();

    let rules = DistributionRules::new().share(successors_specification()).with_everyone();
    let distributed = Arc::new(DistributedFactCache::new());
    let engine = FeedEngine::new(store, Arc::new(rules), distributed.clone());

    let hashes = engine
        .register_feeds(&successors_specification(), &[root.reference()], None)
        .await
        .unwrap();
    engine.poll(&hashes[0], "", DEFAULT_PAGE_SIZE, None).await.unwrap();

    assert!(distributed.includes_all(&[successor.reference()], None));
}

#[tokio::test]
async fn registration_is_distribution_gated() {
    let store = Arc::new(MemoryStore::new());
    let rules = DistributionRules::new();
    let engine =
        FeedEngine::new(store, Arc::new(rules), Arc::new(DistributedFactCache::new()));

    let root = root_fact();
    let result = engine
        .register_feeds(&successors_specification(), &[root.reference()], None)
        .await;
    assert_matches!(result, Err(FeedError::Authorization(_)));
}
