use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpkeepError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UpkeepError {
    /// Short error code string included in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            UpkeepError::Config(_) => "CONFIG_ERROR",
            UpkeepError::AuthFailed(_) => "AUTH_FAILED",
            UpkeepError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, UpkeepError>;
