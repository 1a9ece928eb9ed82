//! Panic capture for units of work.
//!
//! Task threads run caller-supplied closures; a panic in one of them must
//! end up as that task's failure reason instead of skipping the release of
//! its resources.

use crate::types::{Error, Result};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Execute a function, converting a panic into [`Error::Internal`].
///
/// # Example
/// ```
/// use resguard_core::kernel::with_recovery;
///
/// let result: resguard_core::Result<u32> = with_recovery(|| Ok(7), "compute");
/// assert_eq!(result.unwrap(), 7);
/// ```
pub fn with_recovery<F, T>(operation: F, operation_name: &str) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    match catch_unwind(AssertUnwindSafe(operation)) {
        Ok(result) => result,
        Err(panic_payload) => {
            let panic_msg = extract_panic_message(&panic_payload);
            tracing::error!(
                "panic_recovered: operation={}, panic={}",
                operation_name,
                panic_msg
            );

            Err(Error::internal(format!(
                "Panic in {}: {}",
                operation_name, panic_msg
            )))
        }
    }
}

/// Extract panic message from panic payload.
fn extract_panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic (no message)".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_recovery_passes_errors_through() {
        let result: Result<()> = with_recovery(
            || Err(Error::task_failed("bad input")),
            "work",
        );
        assert!(matches!(result, Err(Error::TaskFailed(msg)) if msg == "bad input"));
    }

    #[test]
    fn test_with_recovery_panic_str() {
        let result: Result<()> = with_recovery(|| panic!("boom"), "work");

        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("Panic in work"));
        assert!(err_msg.contains("boom"));
    }

    #[test]
    fn test_with_recovery_panic_string() {
        let result: Result<()> = with_recovery(
            || panic!("{} of {}", 3, 4),
            "work",
        );
        assert!(result.unwrap_err().to_string().contains("3 of 4"));
    }

    #[test]
    fn test_extract_panic_message_opaque_payload() {
        let payload = std::panic::catch_unwind(|| std::panic::panic_any(42u8)).unwrap_err();
        assert_eq!(extract_panic_message(&payload), "Unknown panic (no message)");
    }
}
