use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The session cannot be used; the caller should fall back to an anonymous view.
    #[error("Authentication required")]
    AuthRequired,
    #[error("Token storage unavailable: {0}")]
    StorageUnavailable(#[from] StoreError),
    #[error("Login rejected ({status}): {detail}")]
    LoginRejected { status: u16, detail: String },
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
    #[cfg(feature = "http")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Transport error: {0}")]
    Transport(Box<dyn std::error::Error + Send + Sync>),
    #[error("Response decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Why a token renewal did not produce a usable credential pair.
///
/// Cloneable so that every caller coalesced onto one in-flight refresh
/// receives the same outcome.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum RefreshFailure {
    #[error("No refresh token available")]
    NoRefreshToken,
    #[error("Renewal request failed: {0}")]
    Transport(String),
    #[error("Renewal endpoint rejected the refresh token ({status})")]
    Rejected { status: u16 },
    #[error("Malformed renewal response: {0}")]
    MalformedResponse(String),
    #[error("Renewed tokens could not be stored: {0}")]
    Storage(String),
}

impl From<RefreshFailure> for Error {
    fn from(failure: RefreshFailure) -> Self {
        match failure {
            RefreshFailure::Storage(detail) => {
                Self::StorageUnavailable(StoreError::Unavailable(detail))
            }
            _ => Self::AuthRequired,
        }
    }
}
