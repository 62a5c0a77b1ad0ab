//! Error types for profile fetching.

use thiserror::Error;

/// Result type for profile operations.
pub type Result<T> = std::result::Result<T, ProfileFetchError>;

/// Failure reported by the network client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    /// The service answered with a non-success HTTP status.
    #[error("HTTP status {0}")]
    Status(u16),

    /// The request timed out.
    #[error("request timed out")]
    Timeout,

    /// The connection failed before a response arrived.
    #[error("connection failed: {0}")]
    Connection(String),
}

impl NetworkError {
    /// Whether this looks like a transient connectivity problem.
    pub fn is_network_failure(&self) -> bool {
        match self {
            Self::Timeout | Self::Connection(_) => true,
            Self::Status(status) => *status >= 500,
        }
    }
}

/// Failures while sealing or opening profile fields.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("encryption failed")]
    Encryption,

    #[error("decryption failed")]
    Decryption,

    #[error("ciphertext too short ({0} bytes)")]
    Truncated(usize),

    #[error("plaintext is not valid UTF-8")]
    Utf8,
}

/// Errors surfaced by the profile fetch scheduler.
#[derive(Debug, Error)]
pub enum ProfileFetchError {
    /// The subject was fetched within the cool-down window.
    #[error("profile fetch throttled")]
    Throttled,

    /// The request may only run in the main app process.
    #[error("profile fetch skipped outside the main app")]
    NotMainApp,

    /// HTTP 401.
    #[error("unauthorized")]
    Unauthorized,

    /// HTTP 404.
    #[error("profile missing")]
    Missing,

    /// HTTP 413.
    #[error("rate limited")]
    RateLimit,

    /// The fetched identity key does not decode.
    #[error("invalid identity key")]
    InvalidIdentityKey,

    /// The fetched profile could not be decrypted or validated.
    #[error("invalid profile: {0}")]
    InvalidProfile(String),

    /// Transient network failure that survived the retry budget.
    #[error("network error: {0}")]
    Network(NetworkError),

    /// The local user's avatar could not be downloaded.
    #[error("avatar unavailable: {0}")]
    AvatarUnavailable(NetworkError),

    /// Storage error
    #[error("storage error: {0}")]
    Storage(#[from] conclave_store::Error),

    /// The identity store rejected the fetched key.
    #[error("identity store error: {0}")]
    Identity(String),

    /// The worker queue shut down before the fetch ran.
    #[error("fetch queue closed")]
    QueueClosed,
}

impl ProfileFetchError {
    /// Whether a fresh attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

impl From<NetworkError> for ProfileFetchError {
    fn from(e: NetworkError) -> Self {
        match e {
            NetworkError::Status(401) => Self::Unauthorized,
            NetworkError::Status(404) => Self::Missing,
            NetworkError::Status(413) => Self::RateLimit,
            other => Self::Network(other),
        }
    }
}

impl From<CryptoError> for ProfileFetchError {
    fn from(e: CryptoError) -> Self {
        Self::InvalidProfile(e.to_string())
    }
}
