//! Entistore server: application entry point.
//!
//! Usage:
//!   entistore --port 3000 --db-endpoint ws://127.0.0.1:8000
//!
//! Every option can also be supplied through its environment variable.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use entistore_api::{ApiConfig, AppState, build_router};
use entistore_db::{DEFAULT_TABLE, DbConfig, DbManager};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "entistore")]
#[command(about = "Versioned document CRUD service with soft-delete", version)]
struct Args {
    /// HTTP port to listen on
    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// SurrealDB endpoint (`ws://host:port`, or `mem://` for an embedded store)
    #[arg(long, env = "DB_ENDPOINT", default_value = "ws://127.0.0.1:8000")]
    db_endpoint: String,

    /// SurrealDB namespace
    #[arg(long, env = "DB_NAMESPACE", default_value = "entistore")]
    db_namespace: String,

    /// SurrealDB database
    #[arg(long, env = "DB_DATABASE", default_value = "main")]
    db_database: String,

    /// Root username; sign-in is skipped unless a password is also given
    #[arg(long, env = "DB_USERNAME")]
    db_username: Option<String>,

    /// Root password
    #[arg(long, env = "DB_PASSWORD", hide_env_values = true)]
    db_password: Option<String>,

    /// Collection served under `/{collection}` and its table name
    #[arg(long, env = "DB_TABLE_NAME", default_value = DEFAULT_TABLE)]
    collection: String,

    /// Seconds between connection attempts
    #[arg(long, env = "DB_RETRY_DELAY_SECS", default_value_t = 5)]
    retry_delay_secs: u64,
}

impl Args {
    fn db_config(&self) -> DbConfig {
        DbConfig {
            endpoint: self.db_endpoint.clone(),
            namespace: self.db_namespace.clone(),
            database: self.db_database.clone(),
            table: self.collection.clone(),
            username: self.db_username.clone(),
            password: self.db_password.clone(),
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            ..DbConfig::default()
        }
    }

    fn api_config(&self) -> ApiConfig {
        ApiConfig {
            collection: self.collection.clone(),
            service_name: env!("CARGO_PKG_NAME").into(),
            service_version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("entistore=info,tower_http=info")),
        )
        .json()
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting entistore server");

    let db = DbManager::new(args.db_config()).context("invalid storage configuration")?;
    // Storage connects in the background; requests get 503 until it is up.
    db.connect_with_retry();

    let app = build_router(AppState::new(db.clone(), args.api_config()));

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, collection = %args.collection, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    db.disconnect().await;
    info!("Entistore server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "Unable to install Ctrl-C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Unable to install SIGTERM handler");
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

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_storage_defaults() {
        let args = Args::parse_from(["entistore"]);
        assert_eq!(args.port, 3000);
        let db = args.db_config();
        assert_eq!(db.table, DEFAULT_TABLE);
        assert_eq!(db.retry_delay, Duration::from_secs(5));
        assert!(db.max_attempts.is_none());
        assert_eq!(args.api_config().collection, DEFAULT_TABLE);
    }

    #[test]
    fn collection_flag_drives_route_and_table() {
        let args = Args::parse_from(["entistore", "--collection", "people", "--retry-delay-secs", "1"]);
        assert_eq!(args.db_config().table, "people");
        assert_eq!(args.api_config().collection_path(), "/people");
        assert_eq!(args.db_config().retry_delay, Duration::from_secs(1));
    }
}
