use thiserror::Error;

use webglow_common::error::AppError;

/// Errors raised inside the notification pipeline.
///
/// None of these escape the listener; they are logged where they occur.
#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("Directory lookup failed: {0}")]
    Directory(#[from] AppError),

    #[error("Push delivery failed: {0}")]
    Push(String),

    #[error("Push provider authentication failed: {0}")]
    Auth(String),

    #[error("Feed error: {0}")]
    Feed(String),

    #[error("Call timed out after {0} ms")]
    Timeout(u64),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Delivery ledger error: {0}")]
    Ledger(#[from] redis::RedisError),
}

impl From<sqlx::Error> for NotifierError {
    fn from(e: sqlx::Error) -> Self {
        NotifierError::Directory(AppError::Database(e))
    }
}
