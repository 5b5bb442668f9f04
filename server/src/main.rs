use aog_api::FlavorRegistry;
use aog_client::ReqwestTransport;
use aog_core::GatewayContext;
use aog_protocol::MemStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:16688";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("AOG_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let addr: SocketAddr = std::env::var("AOG_LISTEN_ADDR")
        .unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string())
        .parse()?;

    let registry = Arc::new(FlavorRegistry::from_embedded()?);
    let store = Arc::new(MemStore::new());
    let transport = Arc::new(ReqwestTransport::new()?);
    let ctx = Arc::new(GatewayContext::new(store, registry, transport));
    aog_core::health::refresh_provider_status(&ctx).await?;

    aog_server::serve(addr, ctx).await
}
