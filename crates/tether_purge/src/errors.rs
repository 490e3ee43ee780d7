use thiserror::Error;

pub type PurgeResult<T> = Result<T, PurgeError>;

#[derive(Debug, Error)]
pub enum PurgeError {
    /// Rejected at configuration time: a purge decision cannot itself be
    /// conditional.
    #[error("purge condition for '{0}' contains an existential condition")]
    ConditionalCondition(String),

    #[error("purge condition must name exactly one given, the purge root type")]
    MalformedCondition,

    #[error(transparent)]
    Storage(#[from] tether_storage::StorageError),
}
