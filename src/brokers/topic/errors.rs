use std::io;

/// Failure classes surfaced by topic operations.
///
/// The `Display` text is what ends up in the `error` header of a response.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("topic '{0}' not found")]
    TopicNotFound(String),

    #[error("record not found")]
    RecordNotFound,

    #[error("storage: {0}")]
    Storage(#[from] io::Error),

    #[error("timed out waiting for data")]
    Timeout,
}

impl BrokerError {
    pub fn missing(header: &str) -> Self {
        BrokerError::Validation(format!("missing header '{}'", header))
    }
}
