use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tether_authorization::{AuthorizationRules, DistributedFactCache, DistributionRules};
use tether_feeds::FeedEngine;
use tether_http_server::{AppState, HttpServer, HttpServerConfig};
use tether_keystore::{KeyStore, MemoryKeyStore, PostgresKeyStore};
use tether_model::specification::Specification;
use tether_purge::{PurgeEngine, validate_purge_conditions};
use tether_storage::{MemoryStore, PostgresStore, Store};
use tracing::warn;
use validator::Validate;

use crate::config::NodeConfig;

/// Wires a node. Authorization and distribution policy is supplied by the
/// embedder; a node without policy is closed (no writes, no reads).
pub struct NodeBuilder {
    config: NodeConfig,
    authorization: AuthorizationRules,
    distribution: DistributionRules,
    purge_conditions: Vec<Specification>,
}

impl NodeBuilder {
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            authorization: AuthorizationRules::new(),
            distribution: DistributionRules::new(),
            purge_conditions: Vec::new(),
        }
    }

    pub fn with_authorization(mut self, rules: AuthorizationRules) -> Self {
        self.authorization = rules;
        self
    }

    pub fn with_distribution(mut self, rules: DistributionRules) -> Self {
        self.distribution = rules;
        self
    }

    pub fn with_purge_conditions(mut self, conditions: Vec<Specification>) -> Self {
        self.purge_conditions = conditions;
        self
    }

    pub async fn run(self) -> anyhow::Result<()> {
        self.config.validate()?;
        validate_purge_conditions(&self.purge_conditions)?;

        let (store, keystore): (Arc<dyn Store>, Arc<dyn KeyStore>) =
            match &self.config.postgres {
                Some(url) => {
                    let pool = PgPoolOptions::new()
                        .max_connections(self.config.pool_size)
                        .idle_timeout(Duration::from_millis(self.config.idle_timeout_millis))
                        .connect(url)
                        .await?;
                    let store =
                        Arc::new(PostgresStore::new(pool.clone(), &self.config.schema).await?);
                    let keystore =
                        Arc::new(PostgresKeyStore::new(pool, &self.config.schema));
                    (store, keystore)
                }
                None => {
                    warn!("no Postgres URL configured; using the in-memory store");
                    (Arc::new(MemoryStore::new()), Arc::new(MemoryKeyStore::new()))
                }
            };

        let distributed = Arc::new(DistributedFactCache::new());
        let distribution = Arc::new(self.distribution);
        let feeds = Arc::new(FeedEngine::new(
            store.clone(),
            distribution.clone(),
            distributed.clone(),
        ));
        let purge = Arc::new(PurgeEngine::new(store.clone(), self.purge_conditions)?);

        let state = AppState {
            store,
            keystore,
            authorization: Arc::new(self.authorization),
            distribution,
            feeds,
            purge,
            distributed,
        };
        let server = HttpServer::new(
            HttpServerConfig { ip: self.config.address, port: self.config.port },
            state,
        );
        Ok(server.run().await?)
    }
}
