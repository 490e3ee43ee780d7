//! Route handlers. Every route is mounted under one router; the HTTP
//! boundary catches every error and maps it to a status through
//! [`HttpServerError`]. User identity arrives as a request extension
//! injected by the upstream authenticator; its absence makes the request
//! anonymous.

use std::convert::Infallible;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use futures::stream;
use serde::{Deserialize, Serialize};
use tether_authorization::{AuthorizationEngine, DistributionEngine};
use tether_compiler::{build_feeds, parse_specification};
use tether_feeds::DEFAULT_PAGE_SIZE;
use tether_keystore::UserIdentity;
use tether_model::fact::{FactRecord, FactReference};
use tether_model::results::ReferencesByName;
use tether_model::specification::Specification;
use tracing::{debug, instrument};

use crate::content::{
    csv_columns,
    csv_lines,
    format_compact_json,
    format_pretty_json,
    negotiate,
    ndjson_lines,
    ReadFormat,
    ACCEPT_POST,
};
use crate::declaration::{parse_declarations, Declared};
use crate::errors::{HttpServerError, HttpServerResult};
use crate::server::AppState;

#[cfg(test)]
#[path = "routes_test.rs"]
mod routes_test;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/login", get(login))
        .route("/load", post(load))
        .route("/save", post(save))
        .route("/read", post(read).options(read_options))
        .route("/write", post(write))
        .route("/feeds", post(register_feeds))
        .route("/feeds/{hash}", get(poll_feed))
        .with_state(state)
}

#[derive(Serialize)]
struct Profile {
    #[serde(rename = "displayName")]
    display_name: String,
}

#[derive(Serialize)]
struct LoginResponse {
    #[serde(rename = "userFact")]
    user_fact: FactRecord,
    profile: Profile,
}

#[instrument(skip_all)]
async fn login(
    State(state): State<AppState>,
    user: Option<Extension<UserIdentity>>,
) -> HttpServerResult<Json<LoginResponse>> {
    let Some(Extension(identity)) = user else {
        return Err(HttpServerError::Unauthorized);
    };
    let user_fact = state.keystore.get_or_create_user_fact(&identity).await?;
    // The identity fact enters the graph server-side so that rules can
    // reach it.
    state
        .store
        .save(vec![tether_model::fact::FactEnvelope::unsigned(user_fact.clone())])
        .await?;
    Ok(Json(LoginResponse {
        user_fact,
        profile: Profile { display_name: identity.id },
    }))
}

#[derive(Deserialize)]
struct LoadRequest {
    references: Vec<FactReference>,
}

#[derive(Serialize)]
struct LoadResponse {
    facts: Vec<FactRecord>,
}

#[instrument(skip_all, fields(references = request.references.len()))]
async fn load(
    State(state): State<AppState>,
    user: Option<Extension<UserIdentity>>,
    Json(request): Json<LoadRequest>,
) -> HttpServerResult<Json<LoadResponse>> {
    let user_reference = resolve_user(&state, user.as_deref()).await?;
    if !state
        .distributed
        .includes_all(&request.references, user_reference.as_ref())
    {
        return Err(HttpServerError::Forbidden(
            "the requested facts have not been distributed to this user".to_string(),
        ));
    }
    let envelopes = state.store.load(&request.references).await?;
    Ok(Json(LoadResponse {
        facts: envelopes.into_iter().map(|envelope| envelope.fact).collect(),
    }))
}

#[derive(Deserialize)]
struct SaveRequest {
    facts: Vec<FactRecord>,
}

#[instrument(skip_all, fields(facts = request.facts.len()))]
async fn save(
    State(state): State<AppState>,
    user: Option<Extension<UserIdentity>>,
    Json(request): Json<SaveRequest>,
) -> HttpServerResult<StatusCode> {
    save_facts(&state, user.as_deref(), request.facts).await?;
    Ok(StatusCode::CREATED)
}

/// The shared save path: sign, authorize, persist, purge in real time.
async fn save_facts(
    state: &AppState,
    identity: Option<&UserIdentity>,
    facts: Vec<FactRecord>,
) -> HttpServerResult<()> {
    let user_reference = resolve_user(state, identity).await?;
    let envelopes = state.keystore.sign_facts(identity, facts).await?;
    let admitted = AuthorizationEngine::new(&state.authorization, state.store.as_ref())
        .authorize(user_reference.as_ref(), envelopes)
        .await?;
    let saved = state.store.save(admitted).await?;
    debug!(saved = saved.len(), "facts saved");
    state.purge.on_facts_saved(&saved).await?;
    Ok(())
}

#[instrument(skip_all)]
async fn read(
    State(state): State<AppState>,
    user: Option<Extension<UserIdentity>>,
    headers: HeaderMap,
    body: String,
) -> HttpServerResult<Response> {
    let (specification, start, named_start) = parse_read_request(&body)?;
    let user_reference = resolve_user(&state, user.as_deref()).await?;

    DistributionEngine::new(&state.distribution, state.store.as_ref())
        .can_distribute_to_all(
            &build_feeds(&specification),
            &named_start,
            user_reference.as_ref(),
        )
        .await?;

    let format = negotiate(
        headers.get(header::ACCEPT).and_then(|value| value.to_str().ok()),
    );
    // CSV constraints are checked before running the query: the header
    // derives from the projection alone.
    let columns = match format {
        ReadFormat::Csv => Some(csv_columns(&specification.projection)?),
        _ => None,
    };

    let results = state.store.read(&start, &specification).await?;
    let values: Vec<serde_json::Value> =
        results.into_iter().map(|result| result.value).collect();

    let response = match format {
        ReadFormat::PrettyJson => text_response(format, format_pretty_json(&values)),
        ReadFormat::CompactJson => text_response(format, format_compact_json(&values)),
        ReadFormat::NdJson => {
            let lines: Vec<String> = ndjson_lines(values.into_iter().map(Ok)).collect();
            stream_response(format, lines)
        }
        ReadFormat::Csv => {
            let columns = columns.expect("CSV columns are derived before the query runs");
            let lines: Vec<String> = csv_lines(&columns, values.iter()).collect();
            stream_response(format, lines)
        }
    };
    Ok(response)
}

async fn read_options() -> Response {
    (StatusCode::NO_CONTENT, [("Accept-Post", ACCEPT_POST)]).into_response()
}

#[instrument(skip_all)]
async fn write(
    State(state): State<AppState>,
    user: Option<Extension<UserIdentity>>,
    body: String,
) -> HttpServerResult<StatusCode> {
    let (declarations, rest) = parse_declarations(&body)?;
    if !rest.trim().is_empty() {
        return Err(HttpServerError::InvalidInput(
            "a write body contains declarations only".to_string(),
        ));
    }
    let facts: Vec<FactRecord> = declarations
        .into_iter()
        .filter_map(|(_, declared)| match declared {
            Declared::Record(record) => Some(record),
            Declared::Reference(_) => None,
        })
        .collect();
    save_facts(&state, user.as_deref(), facts).await?;
    Ok(StatusCode::CREATED)
}

#[derive(Deserialize)]
struct FeedsRequest {
    specification: String,
}

#[derive(Serialize)]
struct FeedsResponse {
    feeds: Vec<String>,
}

#[instrument(skip_all)]
async fn register_feeds(
    State(state): State<AppState>,
    user: Option<Extension<UserIdentity>>,
    headers: HeaderMap,
    body: String,
) -> HttpServerResult<Json<FeedsResponse>> {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|content_type| content_type.contains("application/json"));
    let source = if is_json {
        serde_json::from_str::<FeedsRequest>(&body)
            .map_err(|error| HttpServerError::InvalidInput(error.to_string()))?
            .specification
    } else {
        body
    };

    let (specification, start, _) = parse_read_request(&source)?;
    let user_reference = resolve_user(&state, user.as_deref()).await?;
    let feeds = state
        .feeds
        .register_feeds(&specification, &start, user_reference.as_ref())
        .await?;
    Ok(Json(FeedsResponse { feeds }))
}

#[derive(Deserialize)]
struct FeedQuery {
    b: Option<String>,
}

#[derive(Serialize)]
struct FeedPageResponse {
    references: Vec<FactReference>,
    bookmark: String,
}

#[instrument(skip_all, fields(feed = %hash))]
async fn poll_feed(
    State(state): State<AppState>,
    user: Option<Extension<UserIdentity>>,
    Path(hash): Path<String>,
    Query(query): Query<FeedQuery>,
) -> HttpServerResult<Json<FeedPageResponse>> {
    let user_reference = resolve_user(&state, user.as_deref()).await?;
    let page = state
        .feeds
        .poll(
            &hash,
            query.b.as_deref().unwrap_or(""),
            DEFAULT_PAGE_SIZE,
            user_reference.as_ref(),
        )
        .await?;
    Ok(Json(FeedPageResponse { references: page.references, bookmark: page.bookmark }))
}

// Helpers.

/// Splits a text body into declarations and a specification, and binds the
/// specification's givens to the declared references.
fn parse_read_request(
    body: &str,
) -> HttpServerResult<(Specification, Vec<FactReference>, ReferencesByName)> {
    let (declarations, rest) = parse_declarations(body)?;
    let specification = parse_specification(rest)?;
    let mut start = Vec::with_capacity(specification.given.len());
    let mut named_start = ReferencesByName::new();
    for label in &specification.given {
        let reference = declarations
            .iter()
            .find(|(name, _)| name == &label.name)
            .map(|(_, declared)| declared.reference())
            .ok_or_else(|| {
                HttpServerError::InvalidInput(format!(
                    "given '{}' is not declared",
                    label.name
                ))
            })?;
        named_start.insert(label.name.clone(), reference.clone());
        start.push(reference);
    }
    Ok((specification, start, named_start))
}

/// The durable reference of the authenticated user, if any. Resolving an
/// identity issues its keypair on first sight.
async fn resolve_user(
    state: &AppState,
    identity: Option<&UserIdentity>,
) -> HttpServerResult<Option<FactReference>> {
    let Some(identity) = identity else {
        return Ok(None);
    };
    let fact = state.keystore.get_or_create_user_fact(identity).await?;
    Ok(Some(fact.reference()))
}

fn text_response(format: ReadFormat, body: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, format.content_type())],
        body,
    )
        .into_response()
}

fn stream_response(format: ReadFormat, lines: Vec<String>) -> Response {
    let body = Body::from_stream(stream::iter(
        lines.into_iter().map(Ok::<_, Infallible>),
    ));
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, format.content_type())],
        body,
    )
        .into_response()
}
