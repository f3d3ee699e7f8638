//! Error types for featuresync
//!
//! Every fallible operation in the library crates returns [`Result`]. Errors
//! are strongly typed so callers can tell a job failure from a retrieval
//! failure from a corrupt record without string matching.
//!
//! ## Propagation
//!
//! - Per-key errors (`CorruptRecord`, failed writes) never abort a batch
//! - Per-job errors (`JobFailed`, `PollingExhausted`) never affect a sibling job
//! - `Unavailable` marks a transient service condition; see [`Error::is_transient`]

use std::time::Duration;
use thiserror::Error;

/// Result type alias for operations that can fail
pub type Result<T> = std::result::Result<T, Error>;

/// All errors that can occur in featuresync
#[derive(Error, Debug)]
pub enum Error {
    /// The query service rejected the job (malformed query, service refusal).
    ///
    /// Not retried: resubmission may duplicate billable work.
    #[error("Query submission failed: {0}")]
    Submission(String),

    /// Too many consecutive transient errors while polling a job
    #[error("Polling job '{job_id}' exhausted after {consecutive_errors} consecutive transient errors: {last_error}")]
    PollingExhausted {
        job_id: String,
        consecutive_errors: u32,
        last_error: String,
    },

    /// The service reported the job as FAILED or CANCELLED.
    ///
    /// `reason` is the service-provided reason, verbatim.
    #[error("Job '{job_id}' ended in state {state}: {reason}")]
    JobFailed {
        job_id: String,
        state: String,
        reason: String,
    },

    /// The overall polling deadline elapsed before a terminal state
    #[error("Job '{job_id}' did not reach a terminal state within {timeout:?}")]
    JobTimeout { job_id: String, timeout: Duration },

    /// The caller cancelled an in-flight operation
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Reading from the feature store failed; the caller may retry
    #[error("Retrieval failed for customer '{customer_id}': {message}")]
    Retrieval { customer_id: String, message: String },

    /// A scoring precondition was not met
    #[error("Insufficient features for customer '{customer_id}': missing {missing:?}")]
    InsufficientFeatures {
        customer_id: String,
        missing: Vec<String>,
    },

    /// A stored value could not be decoded to its declared type
    #[error("Corrupt record for customer '{customer_id}': feature '{feature}' has unparsable value '{value}'")]
    CorruptRecord {
        customer_id: String,
        feature: String,
        value: String,
    },

    /// Unknown job id, missing artifact or source file
    #[error("Not found: {0}")]
    NotFound(String),

    /// Transient service condition (throttling, temporary outage)
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Storage backend error (SQLite, Redis, DuckDB, filesystem)
    #[error("Storage error: {0}")]
    StorageError(#[from] anyhow::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Invalid input from the caller
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unexpected condition that indicates a bug or a misbehaving service
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl Error {
    /// Creates a ConfigError from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Creates an InvalidInput error from a string
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Creates an InternalError from a string
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }

    /// Creates an Unavailable error from a string
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Creates a Submission error from a string
    pub fn submission(msg: impl Into<String>) -> Self {
        Self::Submission(msg.into())
    }

    /// Whether this error describes a transient condition worth retrying.
    ///
    /// `Unavailable` is always transient. Storage errors are transient when
    /// their message looks like a network, timeout or contention problem.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Unavailable(_) => true,
            Error::StorageError(e) => {
                let msg = e.to_string().to_lowercase();
                msg.contains("network")
                    || msg.contains("connection")
                    || msg.contains("timeout")
                    || msg.contains("timed out")
                    || msg.contains("temporary")
                    || msg.contains("throttl")
                    || msg.contains("unavailable")
                    || msg.contains("busy")
                    || msg.contains("locked")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InsufficientFeatures {
            customer_id: "86".to_string(),
            missing: vec!["latest_purchase_value".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Insufficient features for customer '86': missing [\"latest_purchase_value\"]"
        );
    }

    #[test]
    fn test_job_failed_keeps_reason_verbatim() {
        let err = Error::JobFailed {
            job_id: "q-1".to_string(),
            state: "FAILED".to_string(),
            reason: "SYNTAX_ERROR: line 1:8".to_string(),
        };
        assert!(err.to_string().ends_with("SYNTAX_ERROR: line 1:8"));
    }

    #[test]
    fn test_error_helpers() {
        assert!(matches!(Error::config("x"), Error::ConfigError(_)));
        assert!(matches!(Error::invalid_input("x"), Error::InvalidInput(_)));
        assert!(matches!(Error::submission("x"), Error::Submission(_)));
    }

    #[test]
    fn test_is_transient() {
        assert!(Error::unavailable("throttled").is_transient());
        assert!(Error::StorageError(anyhow::anyhow!("Connection refused")).is_transient());
        assert!(Error::StorageError(anyhow::anyhow!("database is locked")).is_transient());
        assert!(Error::StorageError(anyhow::anyhow!("Request timed out")).is_transient());

        assert!(!Error::StorageError(anyhow::anyhow!("Permanent disk failure")).is_transient());
        assert!(!Error::invalid_input("bad id").is_transient());
        assert!(!Error::submission("malformed query").is_transient());
    }
}
