use clap::Parser;
use tether_node::{NodeBuilder, NodeConfig};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info")
        }))
        .init();

    let config = NodeConfig::parse();
    warn!(
        "no authorization or distribution policy is configured; \
         writes and reads will be rejected until an embedder supplies rules"
    );
    NodeBuilder::new(config).run().await
}
