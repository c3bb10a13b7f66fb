//! Server-side modules for the nutrilog remote store.

pub mod auth;
pub mod feed;
pub mod routes;
pub mod storage;

use std::path::PathBuf;

pub use auth::{ApiKeyStore, AuthUser};
pub use feed::FeedHub;
pub use routes::{router, AppState};
pub use storage::{ServerStorage, ServerStorageError};

/// Directory holding the server database: `NUTRILOG_DATA_DIR`, else the platform data dir.
pub fn data_dir_from_env() -> PathBuf {
    std::env::var("NUTRILOG_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("nutrilog-server")
        })
}
