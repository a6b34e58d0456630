use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Request timed out")]
    Timeout,
    #[error("Rejected by server ({status} {code}): {message}")]
    Rejected { status: u16, code: String, message: String },
    #[error("Message {0} is not in the local session")]
    UnknownMessage(Uuid),
}

impl SyncError {
    /// Transient failures are worth retrying; rejections are not.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout)
    }
}

/// A send that was rolled back. `body` is the text the user typed, so it can
/// be put back into the composer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Send failed: {error}")]
pub struct SendFailed {
    #[source]
    pub error: SyncError,
    pub body: String,
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
