use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::Router;
use tether_authorization::{AuthorizationRules, DistributedFactCache, DistributionRules};
use tether_feeds::FeedEngine;
use tether_keystore::KeyStore;
use tether_purge::PurgeEngine;
use tether_storage::Store;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::routes;

/// Where the adapter binds.
#[derive(Clone, Debug)]
pub struct HttpServerConfig {
    pub ip: IpAddr,
    pub port: u16,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self { ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED), port: 8080 }
    }
}

/// Everything a request handler needs, shared across connections.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub keystore: Arc<dyn KeyStore>,
    pub authorization: Arc<AuthorizationRules>,
    pub distribution: Arc<DistributionRules>,
    pub feeds: Arc<FeedEngine>,
    pub purge: Arc<PurgeEngine>,
    pub distributed: Arc<DistributedFactCache>,
}

pub struct HttpServer {
    config: HttpServerConfig,
    state: AppState,
}

impl HttpServer {
    pub fn new(config: HttpServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    pub fn app(&self) -> Router {
        routes::router(self.state.clone()).layer(TraceLayer::new_for_http())
    }

    pub async fn run(&self) -> std::io::Result<()> {
        let addr = SocketAddr::new(self.config.ip, self.config.port);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, "replicator listening");
        axum::serve(listener, self.app()).await
    }
}
