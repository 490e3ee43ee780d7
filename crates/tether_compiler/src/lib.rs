//! Translates specifications into relational queries.
//!
//! The pipeline is pure: an AST is lowered onto an immutable
//! query-description IR against the interned type/role maps, and the IR is
//! rendered as SQL in three variants (result, feed, purge). Unknown names
//! make a query unsatisfiable rather than erroneous; unsatisfiable queries
//! produce no SQL and therefore no rows.

pub mod compiler;
pub mod errors;
pub mod feeds;
pub mod parser;
pub mod query_description;
pub mod sql;

pub use compiler::{
    decode_bookmark,
    encode_bookmark,
    referenced_names,
    referenced_names_of_specification,
    validate_given,
    ReferencedNames,
    SchemaIndex,
    SpecificationCompiler,
};
pub use errors::{CompilerError, CompilerResult};
pub use feeds::{build_feeds, FeedDefinition};
pub use parser::parse_specification;
pub use query_description::{QueryDescription, SqlParameter};
pub use sql::{SpecificationLabel, SpecificationSqlQuery, SqlQueryTree};
