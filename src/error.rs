//! Error types and handling for flowline
//!
//! Every failure that can cross a pipeline stage is expressed as a
//! [`FlowError`] and delivered through `Observer::on_error`; nothing in the
//! engine unwinds a native panic into caller code.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Main error type for pipeline operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FlowError {
    /// A source failed while generating an item or running a computation
    #[error("producer failed: {0}")]
    Producer(String),
    /// A transform function (`try_map`, `flat_map`, publish side effect) failed
    #[error("transform failed: {0}")]
    Transform(String),
    /// The execution context refused to accept a task
    #[error("scheduler '{0}' rejected the task: shut down")]
    SchedulerClosed(String),
    /// User code panicked; the payload is captured as text
    #[error("panic in user code: {0}")]
    Panic(String),
    /// Custom error with message
    #[error("{0}")]
    Custom(String),
}

/// Result type for flowline operations
pub type FlowResult<T> = Result<T, FlowError>;

impl From<String> for FlowError {
    fn from(msg: String) -> Self {
        FlowError::Custom(msg)
    }
}

impl From<&str> for FlowError {
    fn from(msg: &str) -> Self {
        FlowError::Custom(msg.to_string())
    }
}

/// Render a panic payload as text. Panics carry `&str` or `String` payloads in
/// practice; anything else is reported as opaque.
pub(crate) fn describe_panic(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

/// Run a user-supplied closure, converting a panic into a `FlowError` so it
/// can be routed through `on_error` instead of unwinding through the engine.
pub(crate) fn guard<R>(f: impl FnOnce() -> R) -> FlowResult<R> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|p| FlowError::Panic(describe_panic(p)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_passes_through_success() {
        assert_eq!(guard(|| 7), Ok(7));
    }

    #[test]
    fn guard_captures_panic_message() {
        let err = guard(|| -> i32 { panic!("boom") }).unwrap_err();
        assert_eq!(err, FlowError::Panic("boom".to_string()));
    }
}
