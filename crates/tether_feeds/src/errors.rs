use thiserror::Error;

pub type FeedResult<T> = Result<T, FeedError>;

#[derive(Debug, Error)]
pub enum FeedError {
    /// The hash names no registered feed; surfaced as 404.
    #[error("unknown feed {0}")]
    UnknownFeed(String),

    #[error(transparent)]
    Authorization(#[from] tether_authorization::AuthorizationError),

    #[error(transparent)]
    Compiler(#[from] tether_compiler::CompilerError),

    #[error(transparent)]
    Storage(#[from] tether_storage::StorageError),
}
