//! The gateway's ingress layer: HTTP routes installed from the flavor
//! registry, result-channel streaming with per-flavor framing, and the
//! WebSocket handler bridging duplex clients to upstream gRPC streams.

pub mod http;
pub mod srt;
pub mod ws;

use aog_core::GatewayContext;
use aog_core::Scheduler;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use ws::WsWriterRegistry;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Scheduler,
    pub writers: Arc<WsWriterRegistry>,
}

impl AppState {
    pub fn ctx(&self) -> &Arc<GatewayContext> {
        self.scheduler.ctx()
    }
}

/// Wire everything together: start the scheduler, install the WebSocket
/// bridge, and build the router from the current flavor registry.
pub fn build_gateway(ctx: Arc<GatewayContext>) -> (Router, AppState) {
    let scheduler = Scheduler::start(Arc::clone(&ctx));
    let writers = Arc::new(WsWriterRegistry::new());
    ctx.set_bridge(Arc::new(ws::WsBridge::new(
        Arc::clone(&ctx),
        Arc::clone(&writers),
    )));
    let state = AppState { scheduler, writers };
    (http::build_router(state.clone()), state)
}

pub async fn serve(addr: SocketAddr, ctx: Arc<GatewayContext>) -> anyhow::Result<()> {
    let (router, _state) = build_gateway(ctx);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("gateway listening on {addr}");
    axum::serve(listener, router).await?;
    Ok(())
}
