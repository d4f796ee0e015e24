//! Ares - Social Fitness API Server
//! Mission: Serve account, session and role administration endpoints

use anyhow::{Context, Result};
use ares_backend::{bootstrap::ensure_admin_account, store::Documents, AppState, Config};
use clap::Parser;
use dotenv::dotenv;
use std::{net::SocketAddr, path::Path, path::PathBuf, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "ares")]
#[command(about = "Ares social fitness API server")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, env = "ARES_CONFIG")]
    config: Option<PathBuf>,

    /// Override the listening port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let args = Args::parse();

    info!("🏋️  Ares backend starting");

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate().context("Invalid configuration")?;
    let config = Arc::new(config);

    let state = AppState::build(config.clone())?;

    ensure_admin_account(
        &config.bootstrap,
        config.server.mode,
        &Documents::new(state.store.clone()),
        &ares_backend::auth::PasswordHasher::new(config.auth.bcrypt_cost),
    )
    .await?;

    let purge = state
        .sessions
        .spawn_purge_task(config.cache.purge_interval());

    let app = state.router();
    let addr = config.server.addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("🎯 API server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    purge.abort();
    info!("👋 Ares backend stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("🛑 Shutdown signal received");
}

/// Initialize tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ares_backend=debug,ares=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    // Standard dotenv search (cwd + parents)
    let _ = dotenv();

    // Also try the crate root when launched from elsewhere
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let candidate = manifest_dir.join(".env");
    if candidate.exists() {
        let _ = dotenv::from_path(&candidate);
    }
}
