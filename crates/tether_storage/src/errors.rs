use tether_model::fact::FactReference;
use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    /// A saved fact references predecessors that are neither in the batch
    /// nor in the store. Surfaced to the caller as an invalid request.
    #[error("missing predecessors: {}", format_references(.0))]
    MissingPredecessors(Vec<FactReference>),

    #[error(transparent)]
    Compiler(#[from] tether_compiler::CompilerError),

    #[error(transparent)]
    Graph(#[from] tether_model::GraphError),

    /// A fact projection asked for a record that was not loaded.
    #[error("fact {0:?} is not loaded")]
    MissingFact(FactReference),

    #[error("schema name '{0}' is not valid")]
    InvalidSchemaName(String),

    /// The backend kept failing after the retry budget was exhausted.
    #[error("the backend is unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Backend(#[from] sqlx::Error),
}

fn format_references(references: &[FactReference]) -> String {
    references
        .iter()
        .map(|r| format!("{}:{}", r.fact_type, r.hash))
        .collect::<Vec<_>>()
        .join(", ")
}
