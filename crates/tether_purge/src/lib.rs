//! The purge engine.
//!
//! A purge condition is a specification whose given is the purge root type
//! and whose unknowns are the triggers. Once a trigger exists for a root,
//! every descendant of the root outside the trigger lineage is deleted;
//! the triggers and all of their ancestors, the root included, survive.

pub mod engine;
pub mod errors;

pub use engine::{validate_purge_conditions, PurgeEngine};
pub use errors::{PurgeError, PurgeResult};
