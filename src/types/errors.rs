//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the ResGuard allocator.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or out-of-bounds input (incomplete claim, amount above need).
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown process or task.
    #[error("not found: {0}")]
    NotFound(String),

    /// Request exceeds the currently available pool.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Granting the request would leave no safe completion order.
    #[error("unsafe state: granting {process} would leave {blocked:?} unable to finish")]
    UnsafeState {
        process: String,
        blocked: Vec<String>,
    },

    /// Invalid task state transition.
    #[error("state transition error: {0}")]
    StateTransition(String),

    /// Work observed a cancellation request.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// A unit of work reported failure.
    #[error("task failed: {0}")]
    TaskFailed(String),

    /// Internal errors, including detected invariant violations.
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for errors that reject a request without touching any state.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::Validation(_)
                | Error::NotFound(_)
                | Error::QuotaExceeded(_)
                | Error::UnsafeState { .. }
        )
    }
}

// Convenience constructors
impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn quota_exceeded(msg: impl Into<String>) -> Self {
        Self::QuotaExceeded(msg.into())
    }

    pub fn unsafe_state(process: impl Into<String>, blocked: Vec<String>) -> Self {
        Self::UnsafeState {
            process: process.into(),
            blocked,
        }
    }

    pub fn state_transition(msg: impl Into<String>) -> Self {
        Self::StateTransition(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    pub fn task_failed(msg: impl Into<String>) -> Self {
        Self::TaskFailed(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsafe_state_message_names_blocked_processes() {
        let err = Error::unsafe_state("p2", vec!["p0".to_string(), "p2".to_string()]);
        let msg = err.to_string();
        assert!(msg.contains("granting p2"));
        assert!(msg.contains("\"p0\""));
        assert!(err.is_rejection());
    }

    #[test]
    fn test_io_is_not_rejection() {
        let err = Error::from(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(!err.is_rejection());
        assert!(err.to_string().starts_with("io error"));
    }
}
