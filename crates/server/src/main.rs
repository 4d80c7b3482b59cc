//! Rollup API Server
//!
//! Keeps a cached snapshot of a GitLab group's issues and epics warm and
//! answers dashboard queries against it.

use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rollup::config::Config;
use rollup::datasource::Datasource;
use rollup::transport::DumpTransport;

#[derive(Parser)]
#[command(name = "rollup-server", about = "HTTP API for issue/epic rollups")]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "ROLLUP_CONFIG", default_value = "rollup.toml")]
    config: PathBuf,

    /// Serve a JSON dump instead of the live API
    #[arg(long, env = "ROLLUP_DUMP")]
    dump: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, env = "ROLLUP_BIND", default_value = "0.0.0.0:3000")]
    bind: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("ROLLUP_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    info!("Starting rollup API server...");

    let config = Config::load_or_default(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    let datasource = match &args.dump {
        Some(path) => {
            info!("Serving dump at {}", path.display());
            Datasource::with_transport(config, Arc::new(DumpTransport::new(path)))
        }
        None => {
            if let Err(e) = config.validate() {
                warn!("Configuration is incomplete: {}", e);
            }
            info!(
                "Using {} transport, refresh every {:?}",
                config.api_call_type(),
                config.refresh_interval()
            );
            Datasource::new(config)?
        }
    };

    // Warm the cache without blocking startup
    let warm = datasource.clone();
    tokio::spawn(async move {
        if let Err(e) = warm.refresh().await {
            warn!("Initial refresh failed: {}", e);
        }
    });
    datasource.cache().spawn_background_refresh();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .nest("/api", rollup_server::create_routes(datasource))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&args.bind).await?;
    info!("Server listening on http://{}", args.bind);

    axum::serve(listener, app).await?;

    Ok(())
}
