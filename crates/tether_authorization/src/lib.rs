//! Gatekeeping for writes and reads.
//!
//! Authorization admits a write when the rules configured for the fact's
//! type designate the writer; rules are themselves specifications evaluated
//! against the fact graph. Distribution admits a feed when a share rule
//! covers its shape and the requesting user satisfies the rule's user
//! specification.

pub mod authorization;
pub mod cache;
pub mod distribution;
pub mod errors;

pub use authorization::{AuthorizationEngine, AuthorizationRules, AuthorizationVerdict};
pub use cache::DistributedFactCache;
pub use distribution::{DistributionEngine, DistributionRules};
pub use errors::{AuthorizationError, AuthorizationResult};
