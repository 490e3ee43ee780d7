use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tether_authorization::{AuthorizationRules, DistributedFactCache, DistributionRules};
use tether_compiler::parse_specification;
use tether_feeds::FeedEngine;
use tether_keystore::{MemoryKeyStore, UserIdentity};
use tether_model::fact::{FactRecord, PredecessorCollection};
use tether_purge::PurgeEngine;
use tether_storage::MemoryStore;
use tower::ServiceExt;

use crate::routes::router;
use crate::server::AppState;

const ITEMS_SOURCE: &str = "(order: Order) {
    i: Order.Item [
        i->order: Order = order
    ]
}";

fn test_state() -> AppState {
    let store = Arc::new(MemoryStore::new());
    let distributed = Arc::new(DistributedFactCache::new());
    let distribution = Arc::new(
        DistributionRules::new()
            .share(parse_specification(ITEMS_SOURCE).unwrap())
            .with_everyone(),
    );
    let feeds = Arc::new(FeedEngine::new(
        store.clone(),
        distribution.clone(),
        distributed.clone(),
    ));
    let purge = Arc::new(PurgeEngine::new(store.clone(), vec![]).unwrap());
    AppState {
        store,
        keystore: Arc::new(MemoryKeyStore::new()),
        authorization: Arc::new(
            AuthorizationRules::new().any("Order").any("Order.Item"),
        ),
        distribution,
        feeds,
        purge,
        distributed,
    }
}

fn app() -> (Router, AppState) {
    let state = test_state();
    (router(state.clone()), state)
}

fn order_fact() -> FactRecord {
    FactRecord::new(
        "Order",
        json!({ "createdAt": "T0" }).as_object().unwrap().clone(),
        BTreeMap::new(),
    )
}

fn item_fact(order: &FactRecord) -> FactRecord {
    FactRecord::new(
        "Order.Item",
        json!({ "quantity": 1 }).as_object().unwrap().clone(),
        BTreeMap::from([(
            "order".to_string(),
            PredecessorCollection::Single(order.reference()),
        )]),
    )
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn save_order_graph(app: &Router) -> (FactRecord, FactRecord) {
    let order = order_fact();
    let item = item_fact(&order);
    let request = Request::builder()
        .method("POST")
        .uri("/save")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            serde_json::to_string(&json!({ "facts": [order, item] })).unwrap(),
        ))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    (order, item)
}

fn read_request(body: String, accept: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/read")
        .header(header::CONTENT_TYPE, "text/plain")
        .header(header::ACCEPT, accept)
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn login_without_an_identity_is_unauthorized() {
    let (app, _) = app();
    let request = Request::builder().method("GET").uri("/login").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_returns_the_user_fact_and_profile() {
    let (app, _) = app();
    let request = Request::builder()
        .method("GET")
        .uri("/login")
        .extension(UserIdentity::new("test", "alice"))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["userFact"]["type"], json!("Jinaga.User"));
    assert_eq!(body["profile"]["displayName"], json!("alice"));
}

#[tokio::test]
async fn options_read_advertises_the_accepted_formats() {
    let (app, _) = app();
    let request =
        Request::builder().method("OPTIONS").uri("/read").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        response.headers()["Accept-Post"],
        "text/plain, application/json, application/x-ndjson, text/csv"
    );
}

#[tokio::test]
async fn saved_facts_are_readable() {
    let (app, _) = app();
    let (order, item) = save_order_graph(&app).await;

    let body = format!(
        "let order: Order = #{}\n{} => {{ hash = #i, quantity = i.quantity }}",
        order.hash, ITEMS_SOURCE
    );
    let response = app.oneshot(read_request(body, "application/json")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let results: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(results, json!([{ "hash": item.hash, "quantity": 1 }]));
}

#[tokio::test]
async fn csv_reads_emit_the_header_even_for_zero_rows() {
    let (app, _) = app();
    save_order_graph(&app).await;

    // A given that was never saved: zero rows, header only.
    let body = format!(
        "let order: Order = #never-saved\n{} => {{ hash = #i, name = i.quantity }}",
        ITEMS_SOURCE
    );
    let response = app.oneshot(read_request(body, "text/csv")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "hash,name\n");
}

#[tokio::test]
async fn csv_reads_render_one_line_per_row() {
    let (app, _) = app();
    let (order, item) = save_order_graph(&app).await;

    let body = format!(
        "let order: Order = #{}\n{} => {{ hash = #i, name = i.quantity }}",
        order.hash, ITEMS_SOURCE
    );
    let response = app.oneshot(read_request(body, "text/csv")).await.unwrap();
    let text = body_string(response).await;
    // Hashes are base64: no CSV-special characters, so no quoting.
    assert_eq!(text, format!("hash,name\n{},1\n", item.hash));
}

#[tokio::test]
async fn a_csv_read_with_a_nested_projection_is_rejected() {
    let (app, _) = app();
    let (order, _) = save_order_graph(&app).await;

    let body = format!(
        "let order: Order = #{}\n{} => {{ itself = i }}",
        order.hash, ITEMS_SOURCE
    );
    let response = app.oneshot(read_request(body, "text/csv")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_string(response).await.contains("itself"));
}

#[tokio::test]
async fn an_undeclared_given_is_a_bad_request() {
    let (app, _) = app();
    let response = app
        .oneshot(read_request(ITEMS_SOURCE.to_string(), "text/plain"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn an_unshared_specification_is_forbidden() {
    let (app, _) = app();
    let body = "let store: Store = #h\n(store: Store) { \
                a: Audit [ a->store: Store = store ] }";
    let response =
        app.oneshot(read_request(body.to_string(), "text/plain")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn feeds_register_poll_and_gate_loads() {
    let (app, _) = app();
    let (order, item) = save_order_graph(&app).await;

    // Register the feed.
    let body = format!("let order: Order = #{}\n{}", order.hash, ITEMS_SOURCE);
    let request = Request::builder()
        .method("POST")
        .uri("/feeds")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from(body))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let feeds: Value = serde_json::from_str(&body_string(response).await).unwrap();
    let hash = feeds["feeds"][0].as_str().unwrap().to_string();

    // Loading before any poll is forbidden: nothing was distributed yet.
    let load_request = || {
        Request::builder()
            .method("POST")
            .uri("/load")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                serde_json::to_string(&json!({ "references": [item.reference()] }))
                    .unwrap(),
            ))
            .unwrap()
    };
    let response = app.clone().oneshot(load_request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Poll the feed; the item is delivered with a bookmark.
    let request = Request::builder()
        .method("GET")
        .uri(format!("/feeds/{hash}"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let page: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(page["references"][0]["hash"], json!(item.hash));
    assert!(!page["bookmark"].as_str().unwrap().is_empty());

    // Now the load passes distribution.
    let response = app.clone().oneshot(load_request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let loaded: Value = serde_json::from_str(&body_string(response).await).unwrap();
    let types: Vec<&str> = loaded["facts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|fact| fact["type"].as_str().unwrap())
        .collect();
    // The item arrives with its ancestry.
    assert!(types.contains(&"Order.Item") && types.contains(&"Order"));
}

#[tokio::test]
async fn polling_an_unknown_feed_is_not_found() {
    let (app, _) = app();
    let request = Request::builder()
        .method("GET")
        .uri("/feeds/does-not-exist")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn write_accepts_declarations_only() {
    let (app, _) = app();
    let body = r#"
        let order: Order = { "createdAt": "T0" }
        let item: Order.Item = { "quantity": 2, order: order }
    "#;
    let request = Request::builder()
        .method("POST")
        .uri("/write")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from(body))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    // A trailing specification is rejected.
    let with_specification = format!("let order: Order = {{ \"createdAt\": \"T1\" }}\n{ITEMS_SOURCE}");
    let request = Request::builder()
        .method("POST")
        .uri("/write")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from(with_specification))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
