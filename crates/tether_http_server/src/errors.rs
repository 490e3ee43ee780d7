use axum::response::{IntoResponse, Response};
use http::StatusCode;
use thiserror::Error;
use tracing::{debug, error};

pub type HttpServerResult<T> = Result<T, HttpServerError>;

/// The HTTP boundary's view of every failure. Domain outcomes map to 4xx;
/// everything else is a 500 with a generic body, logged in full.
#[derive(Debug, Error)]
pub enum HttpServerError {
    #[error("authentication required")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    NotFound(String),

    #[error("the service is temporarily unavailable")]
    Unavailable(String),

    #[error("an unexpected error occurred")]
    Unexpected(String),
}

impl IntoResponse for HttpServerError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            HttpServerError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, self.to_string())
            }
            HttpServerError::Forbidden(reason) => {
                debug!(%reason, "request forbidden");
                (StatusCode::FORBIDDEN, reason.clone())
            }
            HttpServerError::InvalidInput(reason) => {
                debug!(%reason, "invalid request");
                (StatusCode::BAD_REQUEST, reason.clone())
            }
            HttpServerError::NotFound(reason) => (StatusCode::NOT_FOUND, reason.clone()),
            HttpServerError::Unavailable(detail) => {
                error!(%detail, "backend unavailable");
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            HttpServerError::Unexpected(detail) => {
                error!(%detail, "unexpected error");
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
        };
        (status, body).into_response()
    }
}

impl From<tether_storage::StorageError> for HttpServerError {
    fn from(error: tether_storage::StorageError) -> Self {
        use tether_storage::StorageError;
        match error {
            StorageError::MissingPredecessors(_)
            | StorageError::Graph(_)
            | StorageError::InvalidSchemaName(_) => {
                HttpServerError::InvalidInput(error.to_string())
            }
            StorageError::Compiler(inner) => inner.into(),
            StorageError::Unavailable(detail) => HttpServerError::Unavailable(detail),
            StorageError::MissingFact(_) | StorageError::Backend(_) => {
                HttpServerError::Unexpected(error.to_string())
            }
        }
    }
}

impl From<tether_compiler::CompilerError> for HttpServerError {
    fn from(error: tether_compiler::CompilerError) -> Self {
        HttpServerError::InvalidInput(error.to_string())
    }
}

impl From<tether_authorization::AuthorizationError> for HttpServerError {
    fn from(error: tether_authorization::AuthorizationError) -> Self {
        use tether_authorization::AuthorizationError;
        match error {
            AuthorizationError::Forbidden(reason) => HttpServerError::Forbidden(reason),
            AuthorizationError::Storage(inner) => inner.into(),
            AuthorizationError::Keystore(inner) => inner.into(),
        }
    }
}

impl From<tether_keystore::KeystoreError> for HttpServerError {
    fn from(error: tether_keystore::KeystoreError) -> Self {
        HttpServerError::Unexpected(error.to_string())
    }
}

impl From<tether_feeds::FeedError> for HttpServerError {
    fn from(error: tether_feeds::FeedError) -> Self {
        use tether_feeds::FeedError;
        match error {
            FeedError::UnknownFeed(hash) => {
                HttpServerError::NotFound(format!("unknown feed {hash}"))
            }
            FeedError::Authorization(inner) => inner.into(),
            FeedError::Compiler(inner) => inner.into(),
            FeedError::Storage(inner) => inner.into(),
        }
    }
}

impl From<tether_purge::PurgeError> for HttpServerError {
    fn from(error: tether_purge::PurgeError) -> Self {
        use tether_purge::PurgeError;
        match error {
            PurgeError::ConditionalCondition(_) | PurgeError::MalformedCondition => {
                HttpServerError::InvalidInput(error.to_string())
            }
            PurgeError::Storage(inner) => inner.into(),
        }
    }
}
