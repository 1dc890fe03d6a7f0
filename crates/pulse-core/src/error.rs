use thiserror::Error;

/// Failure reported by a fetcher.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Worth retrying: timeouts, 5xx, connection resets.
    #[error("transient: {0}")]
    Transient(String),

    /// Retrying will not help: bad credentials, unknown series, garbage payload.
    #[error("permanent: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn transient(msg: impl Into<String>) -> Self {
        FetchError::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        FetchError::Permanent(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

/// Unified error type for the pipeline crates.
#[derive(Error, Debug)]
pub enum PulseError {
    #[error("Transient fetch error for {indicator_id}: {message}")]
    TransientFetch {
        indicator_id: String,
        message: String,
    },

    #[error("Permanent fetch error for {indicator_id}: {message}")]
    PermanentFetch {
        indicator_id: String,
        message: String,
    },

    #[error("Malformed data: {0}")]
    MalformedData(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("EventBus error: {0}")]
    EventBus(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, PulseError>;

impl PulseError {
    pub fn from_fetch(indicator_id: impl Into<String>, err: FetchError) -> Self {
        let indicator_id = indicator_id.into();
        match err {
            FetchError::Transient(message) => PulseError::TransientFetch {
                indicator_id,
                message,
            },
            FetchError::Permanent(message) => PulseError::PermanentFetch {
                indicator_id,
                message,
            },
        }
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        PulseError::MalformedData(msg.into())
    }

    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        PulseError::StoreUnavailable(msg.into())
    }

    /// Whether a retry with backoff may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PulseError::TransientFetch { .. }
                | PulseError::StoreUnavailable(_)
                | PulseError::Timeout(_)
                | PulseError::Io(_)
                | PulseError::Database(_)
        )
    }
}

impl<T> From<tokio::sync::broadcast::error::SendError<T>> for PulseError {
    fn from(err: tokio::sync::broadcast::error::SendError<T>) -> Self {
        PulseError::EventBus(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_conversion() {
        let err = PulseError::from_fetch("cpi", FetchError::transient("503"));
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "Transient fetch error for cpi: 503");

        let err = PulseError::from_fetch("cpi", FetchError::permanent("404"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_malformed_is_not_retryable() {
        assert!(!PulseError::malformed("value is null").is_retryable());
        assert!(PulseError::store_unavailable("disk").is_retryable());
    }
}
