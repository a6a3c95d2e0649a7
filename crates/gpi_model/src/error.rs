//! Error types for the model simulator.
//!
//! Design construction, value access and the step loop all report
//! [`ModelError`]. Errors reaching the runtime through the backend contract
//! are converted to [`GpiError`].

use gpi_core::GpiError;

/// Errors raised while building or running a model design.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// Two siblings were given the same name.
    #[error("duplicate name '{name}' under {parent}")]
    DuplicateName {
        /// Full name of the parent scope.
        parent: String,
        /// The repeated name.
        name: String,
    },

    /// A name, raw handle or ID does not refer to an object.
    #[error("unknown object {0}")]
    UnknownObject(String),

    /// Too many settle iterations at one time step, indicating a loop.
    #[error("delta cycle limit exceeded at step {at} (max {max} deltas)")]
    DeltaLimit {
        /// Time in steps where the limit was hit.
        at: u64,
        /// The configured limit.
        max: u32,
    },

    /// A write arrived while read-only callbacks were running.
    #[error("write to {0} during the read-only phase")]
    ReadOnlyWrite(String),

    /// A write targeted a constant.
    #[error("{0} is a constant")]
    Constant(String),

    /// The value or format does not fit the object.
    #[error("type mismatch on {object}: {reason}")]
    TypeMismatch {
        /// Full name of the object.
        object: String,
        /// What did not fit.
        reason: String,
    },

    /// A vector write had the wrong number of bits.
    #[error("width mismatch on {object}: expected {expected} bits, got {actual}")]
    WidthMismatch {
        /// Full name of the object.
        object: String,
        /// Declared width.
        expected: u32,
        /// Width of the written value.
        actual: u32,
    },

    /// A raw callback value that is not registered.
    #[error("unknown callback {0}")]
    UnknownCallback(u64),

    /// The simulator state was borrowed while the driver needed it.
    #[error("model simulator state is already borrowed")]
    Busy,

    /// The runtime refused a dispatch.
    #[error(transparent)]
    Dispatch(#[from] GpiError),
}

impl From<ModelError> for GpiError {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::UnknownObject(name) => GpiError::ObjectNotFound(name),
            ModelError::ReadOnlyWrite(_) | ModelError::Constant(_) => {
                GpiError::InvalidOperation(e.to_string())
            }
            ModelError::Dispatch(inner) => inner,
            other => GpiError::backend("model", other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_limit_display() {
        let e = ModelError::DeltaLimit { at: 40, max: 100 };
        assert_eq!(
            e.to_string(),
            "delta cycle limit exceeded at step 40 (max 100 deltas)"
        );
    }

    #[test]
    fn width_mismatch_display() {
        let e = ModelError::WidthMismatch {
            object: "top.data".into(),
            expected: 8,
            actual: 4,
        };
        assert_eq!(
            e.to_string(),
            "width mismatch on top.data: expected 8 bits, got 4"
        );
    }

    #[test]
    fn unknown_object_maps_to_not_found() {
        let e: GpiError = ModelError::UnknownObject("top.nope".into()).into();
        assert_eq!(e, GpiError::ObjectNotFound("top.nope".into()));
    }

    #[test]
    fn read_only_write_maps_to_invalid_operation() {
        let e: GpiError = ModelError::ReadOnlyWrite("top.x".into()).into();
        assert!(matches!(e, GpiError::InvalidOperation(_)));
    }

    #[test]
    fn other_errors_are_backend_errors() {
        let e: GpiError = ModelError::UnknownCallback(7).into();
        assert_eq!(e, GpiError::backend("model", "unknown callback 7"));
    }

    #[test]
    fn dispatch_error_unwraps() {
        let e: GpiError = ModelError::from(GpiError::ReentrancyViolation).into();
        assert_eq!(e, GpiError::ReentrancyViolation);
    }
}
