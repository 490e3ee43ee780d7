use thiserror::Error;

pub type CompilerResult<T> = Result<T, CompilerError>;

/// Errors of specification compilation. An unknown fact type or role is NOT
/// an error: it makes the query unsatisfiable, and unsatisfiable queries
/// produce no SQL and no rows.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompilerError {
    #[error("specification expects {expected} given facts, but {actual} were provided")]
    GivenCountMismatch { expected: usize, actual: usize },

    #[error("given fact for '{label}' is of type {actual}, expected {expected}")]
    GivenTypeMismatch { label: String, expected: String, actual: String },

    #[error("label '{0}' is not defined in this scope")]
    UnknownLabel(String),

    #[error(
        "path condition on '{unknown}' does not match: the left walk ends at {left_type}, \
         the right walk at {right_type}"
    )]
    PathTypeMismatch { unknown: String, left_type: String, right_type: String },

    #[error("unknown '{0}' is not bound by any path condition")]
    UnboundUnknown(String),

    #[error("bookmark '{0}' is not a valid tuple of fact ids")]
    InvalidBookmark(String),

    #[error("syntax error at line {line}, column {column}: {message}")]
    Syntax { line: usize, column: usize, message: String },
}
