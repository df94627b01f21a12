//! Error types for the event loop, its callbacks and the cross-thread gateway.

use std::any::Any;
use std::time::Duration;

/// Fatal errors raised while starting or shutting down loop services.
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    /// The timer thread could not be spawned
    #[error("failed to spawn timer thread: {0}")]
    TimerThreadSpawn(#[source] std::io::Error),

    /// The timer thread panicked and could not be joined cleanly
    #[error("timer thread panicked")]
    TimerThreadPanicked,

    /// The timer thread did not stop within the shutdown timeout
    #[error("timer thread did not stop within {0:?}")]
    TimerThreadTimeout(Duration),

    /// Invalid or unreadable configuration
    #[error("invalid loop configuration: {0}")]
    Config(String),
}

/// Failure raised by a queued event, timer callback, round-robin step or
/// resolver. Reported to the diagnostic sink; never stops the loop.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallbackError {
    /// The callback returned an error
    #[error("{0}")]
    Failed(String),

    /// The callback panicked
    #[error("callback panicked: {0}")]
    Panicked(String),
}

impl CallbackError {
    /// Shorthand for [`CallbackError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        CallbackError::Failed(message.into())
    }

    /// Convert a panic payload from `catch_unwind` into an error.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        CallbackError::Panicked(message)
    }
}

/// Failure surfaced by the engine while executing one of its pending jobs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("job failed: {message}")]
pub struct JobError {
    /// Engine-provided description of the failure
    pub message: String,
}

impl JobError {
    /// Create a job error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<CallbackError> for JobError {
    fn from(err: CallbackError) -> Self {
        JobError::new(err.to_string())
    }
}

/// Outcome of a cross-thread submission that did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The loop shut down (or the queue was closed) before the work ran
    #[error("submission rejected: event loop shut down before running it")]
    Rejected,

    /// The submitted work ran and failed
    #[error("submitted work failed: {0}")]
    Failed(#[from] CallbackError),

    /// `submit` was called from the loop thread itself
    #[error("cannot block on a submission from the event loop thread")]
    OnLoopThread,

    /// `submit_timeout` gave up waiting
    #[error("timed out waiting for the event loop")]
    TimedOut,
}

/// Result type for callbacks run by the loop.
pub type CallbackResult<T = ()> = Result<T, CallbackError>;

/// Run a user callback, turning an escaping panic into [`CallbackError::Panicked`].
pub(crate) fn guarded<T>(f: impl FnOnce() -> CallbackResult<T>) -> CallbackResult<T> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(CallbackError::from_panic(payload)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_panic_str_payload() {
        let payload = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(
            CallbackError::from_panic(payload),
            CallbackError::Panicked("boom".to_string())
        );
    }

    #[test]
    fn test_from_panic_string_payload() {
        let payload = std::panic::catch_unwind(|| panic!("code {}", 7)).unwrap_err();
        assert_eq!(
            CallbackError::from_panic(payload),
            CallbackError::Panicked("code 7".to_string())
        );
    }

    #[test]
    fn test_gateway_error_wraps_callback_error() {
        let err: GatewayError = CallbackError::failed("nope").into();
        assert_eq!(err.to_string(), "submitted work failed: nope");
    }
}
