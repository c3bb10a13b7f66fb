//! Nutrilog Server
//!
//! Remote store for nutrilog clients: food catalog, consumption records,
//! derived day/meal/history views and a per-user WebSocket change feed.
//!
//! # Configuration
//!
//! Environment variables:
//! - `NUTRILOG_PORT`: Port to listen on (default: 8080)
//! - `NUTRILOG_DATA_DIR`: Directory holding the database (default: ~/.local/share/nutrilog-server)
//! - `NUTRILOG_SERVER_CONFIG`: Path to config file (default: ~/.config/nutrilog-server/config.yaml)
//!
//! # Config File Format
//!
//! ```yaml
//! api_keys:
//!   - key: "your-secret-key-here"
//!     user_id: "alice"
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use nutrilog::server::{data_dir_from_env, router, ApiKeyStore, AppState, ServerStorage};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Server configuration
#[derive(Debug, Clone)]
struct Config {
    /// Port to listen on
    port: u16,
    /// Directory holding the SQLite database
    data_dir: PathBuf,
    /// Path to config file
    config_path: PathBuf,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        let port = std::env::var("NUTRILOG_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let config_path = std::env::var("NUTRILOG_SERVER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("nutrilog-server")
                    .join("config.yaml")
            });

        Self {
            port,
            data_dir: data_dir_from_env(),
            config_path,
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nutrilog=info,nutrilog_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    tracing::info!("Data directory: {}", config.data_dir.display());
    tracing::info!("Config file: {}", config.config_path.display());

    let storage = match ServerStorage::open(&config.data_dir).await {
        Ok(storage) => storage,
        Err(e) => {
            tracing::error!("Failed to open storage: {}", e);
            std::process::exit(1);
        }
    };

    let api_keys = ApiKeyStore::load(&config.config_path);
    if api_keys.is_empty() {
        tracing::warn!(
            "No API keys configured in {}; every protected request will be rejected",
            config.config_path.display()
        );
    } else {
        tracing::info!("Loaded {} API key(s)", api_keys.len());
    }
    let app = router(AppState::new(storage, api_keys));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
        tracing::info!("Shutting down");
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
