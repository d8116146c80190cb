use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use gavel::auth::{IdentityProvider, TokenDirectory};
use gavel::core::{AuctionSupervisor, BidArbiter, BroadcastHub, SupervisorConfig};
use gavel::db::{DbPool, SqliteAuctionStore};
use gavel::domain::AuctionStore;
use gavel::rpc::{build_rpc_module, GatewayContext, RpcServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let database_url =
        env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:gavel.db?mode=rwc".to_string());
    let http_addr: SocketAddr = env::var("GAVEL_HTTP_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8545".to_string())
        .parse()?;
    let ws_addr: SocketAddr = env::var("GAVEL_WS_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8546".to_string())
        .parse()?;

    let db_pool = DbPool::new(&database_url).await?;
    let store: Arc<dyn AuctionStore> = Arc::new(SqliteAuctionStore::new(db_pool));
    let hub = Arc::new(BroadcastHub::new());

    let mut config = SupervisorConfig::default();
    if let Ok(millis) = env::var("GAVEL_SWEEP_INTERVAL_MS") {
        config.sweep_interval = Duration::from_millis(millis.parse()?);
    }
    if let Ok(secs) = env::var("GAVEL_EVICTION_GRACE_SECS") {
        config.eviction_grace = Duration::from_secs(secs.parse()?);
    }

    let supervisor = Arc::new(AuctionSupervisor::new(
        Arc::clone(&store),
        Arc::clone(&hub),
        config,
    ));
    let _sweeper = supervisor.start_sweeper();
    let arbiter = Arc::new(BidArbiter::new(Arc::clone(&supervisor)));

    // Identity is resolved by the marketplace's auth service in production;
    // this process takes a token directory from the environment.
    let tokens = env::var("GAVEL_TOKENS").unwrap_or_default();
    let auth: Arc<dyn IdentityProvider> = Arc::new(TokenDirectory::from_spec(&tokens)?);

    let module = build_rpc_module(GatewayContext {
        supervisor,
        arbiter,
        hub,
        auth,
    })?;

    let mut server_config = RpcServerConfig::new()
        .with_http_addr(http_addr)
        .with_ws_addr(ws_addr);
    if let Ok(origin) = env::var("GAVEL_CORS_ORIGIN") {
        server_config = server_config.with_cors_origin(origin);
    }
    let server = server_config.build().await?;
    let bound_http = server.http_local_addr()?;
    let bound_ws = server.ws_local_addr()?;
    info!(http = %bound_http, ws = %bound_ws, "auction gateway listening");

    let handle = server.start(module);
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    handle.stop()?;
    Ok(())
}
