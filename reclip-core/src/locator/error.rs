use std::time::Duration;

use thiserror::Error;

pub type LocatorResult<T> = Result<T, LocatorError>;

#[derive(Debug, Error)]
pub enum LocatorError {
    #[error("no request matched a known media CDN")]
    NotFound,
    #[error("page asked for a login before serving media")]
    AuthRequired,
    #[error("navigation did not finish within {0:?}")]
    NavigationTimeout(Duration),
    #[error("chromium launch failed: {0}")]
    Launch(String),
    #[error("cdp error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<tokio::task::JoinError> for LocatorError {
    fn from(err: tokio::task::JoinError) -> Self {
        LocatorError::Launch(err.to_string())
    }
}
