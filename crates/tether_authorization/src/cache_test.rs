use tether_model::fact::FactReference;

use crate::cache::DistributedFactCache;

fn reference(hash: &str) -> FactReference {
    FactReference::new("Order", hash)
}

#[test]
fn distributed_references_are_remembered_per_user() {
    let cache = DistributedFactCache::new();
    let user = FactReference::new("Jinaga.User", "u1");

    cache.add(&[reference("a"), reference("b")], Some(&user));

    assert!(cache.includes_all(&[reference("a"), reference("b")], Some(&user)));
    // A different user has not seen them.
    assert!(!cache.includes_all(&[reference("a")], None));
}

#[test]
fn an_unseen_reference_misses() {
    let cache = DistributedFactCache::new();
    cache.add(&[reference("a")], None);

    assert!(!cache.includes_all(&[reference("a"), reference("c")], None));
}

#[test]
fn the_cache_is_size_bounded() {
    let cache = DistributedFactCache::with_capacity(2);
    cache.add(&[reference("a")], None);
    cache.add(&[reference("b")], None);
    cache.add(&[reference("c")], None);

    // One earlier entry was evicted to make room.
    let a_present = cache.includes_all(&[reference("a")], None);
    let b_present = cache.includes_all(&[reference("b")], None);
    assert!(!(a_present && b_present));
    assert!(cache.includes_all(&[reference("c")], None));
}
