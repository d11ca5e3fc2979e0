use thiserror::Error;

/// Main error type for cache operations
///
/// Cloneable so a single fetch failure can be delivered to every caller
/// that joined the same in-flight fetch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Fetch failed for key {key}: {message}")]
    FetchFailed { key: String, message: String },

    #[error("All {count} sources failed for key {key}")]
    AllSourcesFailed { key: String, count: usize },

    #[error("Fetch for key {0} was abandoned before delivering a result")]
    FlightAbandoned(String),

    #[error("Unexpected value cached under key {0}")]
    UnexpectedValue(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CacheError {
    /// Build a fetch failure from the error returned by a fetch function.
    ///
    /// A `CacheError` raised inside the fetch is passed through unchanged.
    pub fn fetch_failed(key: &str, err: &anyhow::Error) -> Self {
        if let Some(cache_err) = err.downcast_ref::<CacheError>() {
            return cache_err.clone();
        }
        Self::FetchFailed {
            key: key.to_string(),
            message: format!("{:#}", err),
        }
    }

    /// Key the error refers to, if any
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::FetchFailed { key, .. } | Self::AllSourcesFailed { key, .. } => Some(key),
            Self::FlightAbandoned(key) | Self::UnexpectedValue(key) => Some(key),
            Self::InvalidConfig(_) => None,
        }
    }

    /// Whether retrying the same read may succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidConfig(_) | Self::UnexpectedValue(_))
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
