//! The bridge engine: per-thread portals, per-account orchestrators,
//! persistence and the collaborator interface towards the Matrix appservice.

pub mod backfill;
pub mod bridge;
pub mod config;
pub mod db;
pub mod formatter;
pub mod matrix;
pub mod portal;
pub mod puppet;
pub mod user;

pub use bridge::Bridge;
pub use config::Config;

/// Errors crossing the orchestrator layers.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Db(#[from] sqlx::Error),

    #[error(transparent)]
    Matrix(#[from] matrix::MatrixError),

    #[error(transparent)]
    Http(#[from] msgr_client::http::HttpError),

    #[error(transparent)]
    Realtime(#[from] msgr_client::realtime::RealtimeError),

    #[error("user is not logged in")]
    NotLoggedIn,

    #[error("user is not connected to the realtime endpoint")]
    NotConnected,

    #[error("{0} is not supported by the remote network")]
    Unsupported(&'static str),

    #[error("remote send failed: {0}")]
    SendFailed(String),

    #[error("{0}")]
    Other(String),
}

impl BridgeError {
    /// Whether the Matrix origin event should be marked as retriable.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            BridgeError::Db(_)
                | BridgeError::Matrix(matrix::MatrixError::RateLimited { .. })
                | BridgeError::NotConnected
                | BridgeError::Realtime(_)
        )
    }
}

/// Milliseconds since the unix epoch.
pub(crate) fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Seconds since the unix epoch.
pub(crate) fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
