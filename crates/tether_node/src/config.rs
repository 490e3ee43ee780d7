use std::net::{IpAddr, Ipv4Addr};

use clap::Parser;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;

pub const DEFAULT_IDLE_TIMEOUT_MILLIS: u64 = 30_000;

/// Node configuration. CLI flags layer over defaults; the backend idle
/// timeout also honors `POSTGRES_IDLE_TIMEOUT_MILLIS`.
#[derive(Clone, Debug, Parser, Serialize, Deserialize, Validate, PartialEq)]
#[command(name = "tether", about = "Fact-graph replicator node")]
pub struct NodeConfig {
    /// Address to bind the HTTP adapter to.
    #[arg(long, default_value = "0.0.0.0")]
    pub address: IpAddr,

    /// Port to bind the HTTP adapter to.
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// Postgres connection URL. Without one, the node runs on the
    /// in-memory store and keystore, for development only.
    #[arg(long)]
    pub postgres: Option<String>,

    /// Schema holding the replicator tables.
    #[arg(long, default_value = "public")]
    #[validate(custom(function = "validate_schema_name"))]
    pub schema: String,

    /// Size of the backend connection pool.
    #[arg(long, default_value_t = 10)]
    #[validate(range(min = 1))]
    pub pool_size: u32,

    /// Idle timeout for pooled connections, in milliseconds.
    #[arg(
        long,
        env = "POSTGRES_IDLE_TIMEOUT_MILLIS",
        default_value_t = DEFAULT_IDLE_TIMEOUT_MILLIS
    )]
    pub idle_timeout_millis: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
            postgres: None,
            schema: "public".to_string(),
            pool_size: 10,
            idle_timeout_millis: DEFAULT_IDLE_TIMEOUT_MILLIS,
        }
    }
}

fn validate_schema_name(name: &str) -> Result<(), ValidationError> {
    tether_storage::schema::validate_schema_name(name)
        .map_err(|_| ValidationError::new("schema_name"))
}
