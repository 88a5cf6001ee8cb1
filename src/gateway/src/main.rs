use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ridesync_core::{
    build_router, ridesync_db_path, AppContext, HttpPaymentBackend, NoopPaymentBackend,
    PaymentBackend, RideSyncConfig, SqliteStore, SyncConfig,
};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_filter())
        .init();

    let file_config = load_file_config();
    let defaults = file_config.apply(SyncConfig::default());

    let bind = parse_socket("RIDESYNC_BIND", defaults.bind);
    let payment_base_url = env::var("RIDESYNC_PAYMENT_URL")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| defaults.payment_base_url.clone());
    let upcoming_rides_grace =
        parse_duration("RIDESYNC_GRACE_UPCOMING_SECS", defaults.upcoming_rides_grace);
    let trip_details_grace =
        parse_duration("RIDESYNC_GRACE_DETAILS_SECS", defaults.trip_details_grace);

    let config = SyncConfig {
        bind,
        payment_base_url,
        upcoming_rides_grace,
        trip_details_grace,
        ..defaults
    };

    let db_path = match env::var("RIDESYNC_DB_PATH") {
        Ok(path) => PathBuf::from(path),
        Err(_) => match file_config.store.db_path.as_deref() {
            Some(path) if !path.trim().is_empty() => PathBuf::from(path.trim()),
            _ => ridesync_db_path()?,
        },
    };
    let store = Arc::new(SqliteStore::open(&db_path)?);
    tracing::info!(path = %db_path.display(), "document store opened");

    let payments: Arc<dyn PaymentBackend> =
        match HttpPaymentBackend::new(&config.payment_base_url, config.payment_timeout) {
            Ok(backend) => Arc::new(backend),
            Err(err) => {
                tracing::warn!(
                    url = %config.payment_base_url,
                    error = %err,
                    "payment backend unavailable; payment releases will be skipped"
                );
                Arc::new(NoopPaymentBackend)
            }
        };

    let ctx = AppContext::new(config.clone(), store, payments);
    let app = build_router(ctx.clone());

    let listener = TcpListener::bind(config.bind).await?;
    tracing::info!(addr = %config.bind, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    ctx.registry.stop_all_listening();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

fn load_file_config() -> RideSyncConfig {
    match RideSyncConfig::load() {
        Ok(config) => config,
        Err(err) => {
            let path = RideSyncConfig::config_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| "~/.ridesync/config.toml".to_string());
            tracing::warn!(%path, error = %err, "failed to load ridesync config; using defaults");
            RideSyncConfig::default()
        }
    }
}

fn parse_socket(key: &str, default: SocketAddr) -> SocketAddr {
    match env::var(key) {
        Ok(v) => v.parse().unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_duration(key: &str, default: Duration) -> Duration {
    match env::var(key) {
        Ok(v) => v.parse::<u64>().map(Duration::from_secs).unwrap_or(default),
        Err(_) => default,
    }
}

fn tracing_filter() -> tracing_subscriber::EnvFilter {
    let explicit = env::var("RIDESYNC_LOG").or_else(|_| env::var("RUST_LOG")).ok();
    if let Some(filter) = explicit {
        return tracing_subscriber::EnvFilter::new(filter);
    }
    if matches!(
        env::var("RIDESYNC_DEBUG").as_deref(),
        Ok("1" | "true" | "TRUE" | "yes" | "YES")
    ) {
        return tracing_subscriber::EnvFilter::new("debug");
    }
    tracing_subscriber::EnvFilter::new("info")
}
