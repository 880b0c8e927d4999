use std::time::Duration;

use thiserror::Error;

use vigil_state::StateError;

/// Why a single delivery attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("webhook delivery timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {0}")]
    HttpStatus(u16),

    #[error("invalid target url: {0}")]
    InvalidUrl(String),

    #[error("failed to serialize payload: {0}")]
    Serialize(String),
}

impl DeliveryError {
    /// Status code of the response that caused the failure, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            DeliveryError::HttpStatus(code) => Some(*code),
            _ => None,
        }
    }
}

/// Errors constructing or driving the delivery engine.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error(transparent)]
    State(#[from] StateError),
}
