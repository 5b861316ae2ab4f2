use thiserror::Error;

/// Result type alias for cart operations.
pub type Result<T> = std::result::Result<T, CartSyncError>;

#[derive(Error, Debug)]
pub enum CartSyncError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serde: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config: {0}")]
    Config(#[from] serde_yaml::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    /// The remote collection rejected or failed a request.
    #[error("remote store: {0}")]
    Remote(String),
    /// The operation needs connectivity and the device is offline.
    #[error("device is offline")]
    Offline,
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("invalid state: {0}")]
    State(&'static str),
}

impl CartSyncError {
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
