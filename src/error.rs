use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single problem found while validating configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Unified error type for the view counting and ranking engine.
#[derive(Error, Debug, Clone)]
pub enum ViewRankError {
    /// Counter or ranking store could not be reached (network failure,
    /// command timeout, open circuit breaker).
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The item repository failed during a ranking lookup
    #[error("Item repository unavailable: {0}")]
    RepositoryUnavailable(String),

    /// Counter increment succeeded but the ranking update did not (or the
    /// two stores were found to disagree).
    #[error("Counter and ranking diverged for item {item_id}: {detail}")]
    PartialUpdateDivergence { item_id: String, detail: String },

    /// The store answered but refused the command (wrong key type, script
    /// error, bad auth). Retrying does not help.
    #[error("Store rejected command: {0}")]
    StoreRejected(String),

    /// Invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Validation error with messages
    #[error("Validation error: {}", .0.iter().map(|i| i.to_string()).collect::<Vec<_>>().join("; "))]
    ValidationError(Vec<ValidationIssue>),

    /// Parse/serialization error
    #[error("Parse error: {0}")]
    ParseError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(String),
}

impl ViewRankError {
    /// Check if this error is transient and retryable
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ViewRankError::StoreUnavailable(_) | ViewRankError::RepositoryUnavailable(_)
        )
    }

    /// Check if this error came from one of the backing stores
    pub fn is_store_failure(&self) -> bool {
        matches!(self, ViewRankError::StoreUnavailable(_))
    }
}

// === Conversion Implementations ===

macro_rules! impl_from_error {
    ($err_type:ty, $arm:pat => $body:expr) => {
        impl From<$err_type> for ViewRankError {
            fn from(err: $err_type) -> Self {
                match err {
                    $arm => $body,
                }
            }
        }
    };
}

impl_from_error!(std::io::Error, e => match e.kind() {
    std::io::ErrorKind::TimedOut => ViewRankError::StoreUnavailable(format!("timed out: {}", e)),
    std::io::ErrorKind::InvalidInput => ViewRankError::InvalidArgument(e.to_string()),
    _ => ViewRankError::IoError(e.to_string()),
});

impl_from_error!(redis::RedisError, e => if e.is_timeout() {
    ViewRankError::StoreUnavailable(format!("redis command timed out: {}", e))
} else if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
    ViewRankError::StoreUnavailable(format!("redis connection failed: {}", e))
} else {
    match e.kind() {
        redis::ErrorKind::TypeError => {
            ViewRankError::ParseError(format!("unexpected redis reply: {}", e))
        }
        // Server-side states that clear up on their own
        redis::ErrorKind::BusyLoadingError
        | redis::ErrorKind::TryAgain
        | redis::ErrorKind::ClusterDown
        | redis::ErrorKind::MasterDown => ViewRankError::StoreUnavailable(e.to_string()),
        _ => ViewRankError::StoreRejected(e.to_string()),
    }
});

impl_from_error!(serde_json::Error, e => ViewRankError::ParseError(e.to_string()));
impl_from_error!(toml::de::Error, e => ViewRankError::ParseError(e.to_string()));

/// Result type alias for operations that can fail with ViewRankError.
pub type ViewRankResult<T> = Result<T, ViewRankError>;
