//! Triggers: the conditions a suspended task waits for.

use crate::error::GpiError;
use crate::handle::{Edge, ObjectHandle, Phase};
use gpi_common::{Precision, TimeUnit};
use std::fmt;

/// An immutable wait condition yielded by a task.
///
/// Triggers are values: yielding the same trigger twice makes two separate
/// registrations.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// A value change of `handle` matching the edge.
    Edge(ObjectHandle, Edge),
    /// A relative delay in simulator steps.
    Timer(u64),
    /// The read-only phase of the current time step.
    ReadOnly,
    /// The read-write phase of the current time step.
    ReadWrite,
    /// The start of the next time step.
    NextTimeStep,
}

impl Trigger {
    /// Waits for `handle` to become high.
    pub fn rising(handle: &ObjectHandle) -> Self {
        Trigger::Edge(handle.clone(), Edge::Rising)
    }

    /// Waits for `handle` to become low.
    pub fn falling(handle: &ObjectHandle) -> Self {
        Trigger::Edge(handle.clone(), Edge::Falling)
    }

    /// Waits for any change of `handle`.
    pub fn value_change(handle: &ObjectHandle) -> Self {
        Trigger::Edge(handle.clone(), Edge::Any)
    }

    /// Waits `amount` of `unit`, converted to steps with `precision`.
    ///
    /// Amounts that are not a whole number of steps are rejected rather
    /// than rounded.
    pub fn timer(amount: u64, unit: TimeUnit, precision: Precision) -> Result<Self, GpiError> {
        precision
            .to_steps(amount, unit)
            .map(Trigger::Timer)
            .ok_or_else(|| {
                GpiError::InvalidArgument(format!(
                    "{amount} {unit:?} is not a whole number of simulator steps at precision 1e{}s",
                    precision.0
                ))
            })
    }

    /// The phase this trigger waits for, if it is a phase trigger.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Trigger::ReadOnly => Some(Phase::ReadOnly),
            Trigger::ReadWrite => Some(Phase::ReadWrite),
            Trigger::NextTimeStep => Some(Phase::NextTimeStep),
            _ => None,
        }
    }

    /// Key under which waits for this trigger are shared, `None` for timers.
    pub(crate) fn share_key(&self) -> Option<WaitKey> {
        match self {
            Trigger::Edge(handle, edge) => Some(WaitKey::Edge(handle.clone(), *edge)),
            Trigger::Timer(_) => None,
            other => other.phase().map(WaitKey::Phase),
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Edge(handle, Edge::Rising) => write!(f, "RisingEdge({})", handle.full_name()),
            Trigger::Edge(handle, Edge::Falling) => {
                write!(f, "FallingEdge({})", handle.full_name())
            }
            Trigger::Edge(handle, Edge::Any) => write!(f, "ValueChange({})", handle.full_name()),
            Trigger::Timer(steps) => write!(f, "Timer({steps} steps)"),
            Trigger::ReadOnly => write!(f, "ReadOnly"),
            Trigger::ReadWrite => write!(f, "ReadWrite"),
            Trigger::NextTimeStep => write!(f, "NextTimeStep"),
        }
    }
}

/// Identity of a shareable wait.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum WaitKey {
    Edge(ObjectHandle, Edge),
    Phase(Phase),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{ObjectDesc, ObjectType};
    use crate::ids::BackendId;

    fn clk() -> ObjectHandle {
        ObjectHandle::new(
            BackendId::from_raw(0),
            ObjectDesc::new(3, "clk", "top.clk", ObjectType::Logic),
        )
    }

    #[test]
    fn timer_converts_units() {
        assert_eq!(
            Trigger::timer(10, TimeUnit::Ns, Precision::PS).unwrap(),
            Trigger::Timer(10_000)
        );
        assert_eq!(
            Trigger::timer(5, TimeUnit::Step, Precision::NS).unwrap(),
            Trigger::Timer(5)
        );
    }

    #[test]
    fn timer_rejects_fractional_steps() {
        let err = Trigger::timer(1, TimeUnit::Ps, Precision::NS).unwrap_err();
        assert!(matches!(err, GpiError::InvalidArgument(_)));
    }

    #[test]
    fn share_keys() {
        let h = clk();
        assert_eq!(
            Trigger::rising(&h).share_key(),
            Some(WaitKey::Edge(h.clone(), Edge::Rising))
        );
        assert_ne!(Trigger::rising(&h).share_key(), Trigger::falling(&h).share_key());
        assert_eq!(
            Trigger::ReadOnly.share_key(),
            Some(WaitKey::Phase(Phase::ReadOnly))
        );
        assert_eq!(Trigger::Timer(4).share_key(), None);
    }

    #[test]
    fn display_names_object() {
        assert_eq!(Trigger::rising(&clk()).to_string(), "RisingEdge(top.clk)");
        assert_eq!(Trigger::value_change(&clk()).to_string(), "ValueChange(top.clk)");
        assert_eq!(Trigger::Timer(3).to_string(), "Timer(3 steps)");
    }
}
