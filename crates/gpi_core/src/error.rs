//! Error types for the runtime and for tasks running inside it.
//!
//! [`GpiError`] covers every failure the runtime reports to its callers;
//! [`TaskError`] is the terminal error a task finishes with and what its
//! joiners observe.

use crate::ids::{ClockId, TaskId};
use std::any::Any;

/// Errors reported by the runtime, its registry and its backends.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GpiError {
    /// The simulator refused a callback registration.
    #[error("callback registration failed: {0}")]
    RegistrationFailure(String),

    /// The operation is not allowed on this object or in the current phase.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A task yielded something the scheduler cannot wait on.
    #[error("scheduling error: {0}")]
    SchedulingError(String),

    /// A callback was dispatched while another dispatch was still running.
    #[error("re-entrant callback dispatch")]
    ReentrancyViolation,

    /// The embedded test environment could not be prepared or started.
    #[error("test environment failed to initialize: {0}")]
    EnvironmentInitFailure(String),

    /// An argument is outside its accepted range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The resource is already in use.
    #[error("busy: {0}")]
    Busy(String),

    /// A required object could not be located in the design.
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// The task id does not belong to this runtime.
    #[error("unknown task {0:?}")]
    UnknownTask(TaskId),

    /// The clock id does not belong to this runtime or was destroyed.
    #[error("unknown clock {0:?}")]
    UnknownClock(ClockId),

    /// A backend reported a failure that fits no other category.
    #[error("{backend} backend: {message}")]
    Backend {
        /// Name of the reporting backend.
        backend: String,
        /// Backend-supplied description.
        message: String,
    },
}

impl GpiError {
    /// Shorthand for a [`GpiError::Backend`] error.
    pub fn backend(backend: impl Into<String>, message: impl Into<String>) -> Self {
        GpiError::Backend {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Whether the process hosting the runtime must stop after logging
    /// this error: nested dispatch, or a test environment that could not
    /// be brought up.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GpiError::ReentrancyViolation | GpiError::EnvironmentInitFailure(_)
        )
    }
}

/// The error a task finishes with.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskError {
    /// The task body reported a failure.
    #[error("task failed: {0}")]
    Failed(String),

    /// The task yielded something that could not be scheduled.
    #[error("task could not be scheduled: {0}")]
    Scheduling(#[from] GpiError),

    /// The task was cancelled before it finished.
    #[error("task cancelled")]
    Cancelled,

    /// The task body panicked.
    #[error("task panicked: {0}")]
    Panicked(String),
}

/// Extracts the message carried by a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
