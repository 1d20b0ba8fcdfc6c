use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::services::{ServeDir, ServeFile};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kmun::api::rate_limit::spawn_cleanup_task;
use kmun::config::Config;
use kmun::AppState;

#[derive(Parser, Debug)]
#[command(name = "kmun")]
#[command(author, version, about = "KMUN registration and allocation server", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "kmun.toml")]
    config: PathBuf,

    /// Override log level
    #[arg(short, long, env = "KMUN_LOG_LEVEL")]
    log_level: Option<String>,

    /// Override the token signing secret
    #[arg(long, env = "KMUN_JWT_SECRET", hide_env_values = true)]
    jwt_secret: Option<String>,

    /// Override the data directory
    #[arg(long, env = "KMUN_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)?;
    if let Some(secret) = cli.jwt_secret {
        config.auth.jwt_secret = secret;
    }
    if let Some(data_dir) = cli.data_dir {
        config.server.data_dir = data_dir;
    }

    let log_level = cli
        .log_level
        .as_ref()
        .unwrap_or(&config.logging.level)
        .clone();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting KMUN server v{}", env!("CARGO_PKG_VERSION"));
    kmun::api::health::mark_started();

    std::fs::create_dir_all(&config.server.data_dir).with_context(|| {
        format!(
            "Failed to create data directory {}",
            config.server.data_dir.display()
        )
    })?;
    std::fs::create_dir_all(&config.uploads.dir).with_context(|| {
        format!(
            "Failed to create upload directory {}",
            config.uploads.dir.display()
        )
    })?;

    let db = kmun::db::init(&config.server.data_dir).await?;

    kmun::api::auth::ensure_admin_user(&db, &config.auth).await?;

    if !config.email.is_configured() {
        tracing::warn!("SMTP is not configured; applicant emails will be skipped");
    }

    let state = Arc::new(AppState::new(config.clone(), db));

    spawn_cleanup_task(
        state.rate_limiter.clone(),
        config.rate_limit.cleanup_interval,
    );

    let api_router = kmun::api::create_router(state.clone());

    // Built front end with SPA fallback
    let static_dir = &config.server.static_dir;
    let index_file = static_dir.join("index.html");
    let serve_static = ServeDir::new(static_dir).not_found_service(ServeFile::new(&index_file));

    let app = axum::Router::new()
        .merge(api_router)
        .fallback_service(serve_static);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("API server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
