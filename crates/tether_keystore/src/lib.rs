//! Keypair issuance and fact signing.
//!
//! A user or device identity maps to a lazily generated RSA-2048 keypair.
//! The public key, PEM-encoded, is the single field of the corresponding
//! identity fact; the hash of that fact is the durable identity within the
//! graph. Signing never re-signs: a fact whose supplied hash diverges from
//! its content gets an empty signature list.

pub mod errors;
pub mod keystore;
pub mod memory;
pub mod postgres;
pub mod signing;

pub use errors::{KeystoreError, KeystoreResult};
pub use keystore::{KeyStore, UserIdentity};
pub use memory::MemoryKeyStore;
pub use postgres::PostgresKeyStore;
pub use signing::{sign_facts_with, verify_envelope};
