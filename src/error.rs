use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Acquisition timed out after {0:?}")]
    Timeout(Duration),

    /// A ticket or permit was released a second time.
    #[error("Ticket already released")]
    AlreadyReleased,

    #[error("Queue key must not be empty")]
    EmptyKey,

    #[error("Batch submission failed: {0}")]
    Submit(Arc<anyhow::Error>),

    #[error("Batch result is missing key {0}")]
    MissingResult(String),

    #[error("Request dropped before completion")]
    Closed,
}

pub type Result<T> = std::result::Result<T, AppError>;
