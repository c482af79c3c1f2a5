//! # Vigil Daemon
//!
//! Keeps agent telemetry caches warm and serves them to local consumers

use anyhow::Context;
use clap::Parser;
use remote_gateway::HttpGateway;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use sync_engine::AgentSync;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use vigil_core::{
    FanoutSink, Identity, MemorySink, RemoteGateway, SessionStore, TracingSink, VigilConfig,
    BUILD_INFO, VERSION,
};
use vigil_daemon::{offline_gateway, router, DaemonState};

#[derive(Parser, Debug)]
#[command(name = "vigil-daemon")]
#[command(about = "Vigil daemon - agent telemetry synchronization service")]
#[command(version = VERSION)]
struct Args {
    /// JSON configuration file; defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "0.0.0.0:8090")]
    listen: SocketAddr,

    /// Owner whose records are synchronized
    #[arg(long)]
    owner: Option<Uuid>,

    /// Bearer token of the signed-in user
    #[arg(long)]
    access_token: Option<String>,

    /// Serve from an in-process record store instead of the backend
    #[arg(long)]
    offline: bool,

    /// Seed file for the offline store: `{collection: [records]}`
    #[arg(long, requires = "offline")]
    seed: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    info!("Starting {}", BUILD_INFO);

    let config = match &args.config {
        Some(path) => VigilConfig::from_json_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => VigilConfig::default(),
    };

    let gateway: Arc<dyn RemoteGateway> = if args.offline {
        info!(seed = ?args.seed, "running against the in-process record store");
        Arc::new(offline_gateway(&config, args.seed.as_deref())?)
    } else {
        let http = HttpGateway::new(&config.gateway)?;
        http.set_access_token(args.access_token.clone());
        info!(base_url = %config.gateway.base_url, "running against the remote backend");
        Arc::new(http)
    };

    let session = match args.owner {
        Some(owner) => SessionStore::signed_in(Identity::new(owner)),
        None => {
            warn!("no --owner given, feeds will report Unauthenticated");
            SessionStore::new()
        }
    };

    let recent = MemorySink::default();
    let sink = FanoutSink::new()
        .with(Arc::new(TracingSink))
        .with(Arc::new(recent.clone()));

    let sync = Arc::new(AgentSync::new(
        config,
        gateway,
        Arc::new(session),
        Arc::new(sink),
    )?);
    let state = Arc::new(DaemonState::new(sync, recent));
    let app = router(state);

    let listener = TcpListener::bind(args.listen).await?;
    info!("Vigil daemon listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                warn!(%error, "cannot listen for shutdown signal");
            }
        })
        .await?;

    info!("Vigil daemon stopped");
    Ok(())
}
