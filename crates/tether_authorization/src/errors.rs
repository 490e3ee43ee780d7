use thiserror::Error;

pub type AuthorizationResult<T> = Result<T, AuthorizationError>;

#[derive(Debug, Error)]
pub enum AuthorizationError {
    /// A domain outcome, not a fault: surfaced to the caller as 403 and not
    /// logged as an error.
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Storage(#[from] tether_storage::StorageError),

    #[error(transparent)]
    Keystore(#[from] tether_keystore::KeystoreError),
}
