//! The contract every simulator adapter implements.
//!
//! A backend translates the uniform operations below into one native
//! procedural interface. Callback registrations carry the [`CallbackId`]
//! the simulator must hand back on firing; backends never store Rust
//! closures or pointers to runtime memory in the simulator.

use crate::error::GpiError;
use crate::handle::{Edge, LifecycleEvent, ObjectDesc, ObjectHandle, Phase};
use crate::ids::CallbackId;
use gpi_common::{LogicVec, Precision, SimTime};
use std::fmt;

/// Representation requested from [`Backend::get_value`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueFormat {
    /// 9-state binary string, most significant bit first.
    BinStr,
    /// Raw bytes (strings and byte arrays).
    Bytes,
    /// IEEE-754 double.
    Real,
    /// 32-bit signed integer.
    Int,
}

/// A value read from or written to a simulation object.
#[derive(Clone, Debug, PartialEq)]
pub enum SignalValue {
    /// 9-state binary value.
    BinStr(LogicVec),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// IEEE-754 double.
    Real(f64),
    /// 32-bit signed integer.
    Int(i32),
}

impl SignalValue {
    /// Parses a binary string such as `"01XZ"` (MSB first).
    pub fn bin_str(s: &str) -> Result<Self, GpiError> {
        LogicVec::from_binary_str(s)
            .map(SignalValue::BinStr)
            .ok_or_else(|| {
                GpiError::InvalidArgument(format!(
                    "'{s}' is not a binary string over 0 1 X Z U W L H -"
                ))
            })
    }

    /// The format this value is expressed in.
    pub fn format(&self) -> ValueFormat {
        match self {
            SignalValue::BinStr(_) => ValueFormat::BinStr,
            SignalValue::Bytes(_) => ValueFormat::Bytes,
            SignalValue::Real(_) => ValueFormat::Real,
            SignalValue::Int(_) => ValueFormat::Int,
        }
    }

    /// Borrows the logic vector of a `BinStr` value.
    pub fn as_bits(&self) -> Option<&LogicVec> {
        match self {
            SignalValue::BinStr(bits) => Some(bits),
            _ => None,
        }
    }

    /// Integer view: `Int` directly, or a resolvable `BinStr` of at most 32
    /// bits read as unsigned.
    pub fn as_int(&self) -> Option<i32> {
        match self {
            SignalValue::Int(v) => Some(*v),
            SignalValue::BinStr(bits) => bits.to_i32(),
            _ => None,
        }
    }
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalValue::BinStr(bits) => write!(f, "{bits}"),
            SignalValue::Bytes(bytes) => write!(f, "{}", String::from_utf8_lossy(bytes)),
            SignalValue::Real(v) => write!(f, "{v}"),
            SignalValue::Int(v) => write!(f, "{v}"),
        }
    }
}

/// How a write is applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WriteAction {
    /// Deposit, visible after the current evaluation.
    Deposit,
    /// Force until released.
    Force,
    /// Release a previous force.
    Release,
    /// Deposit without any scheduling delay.
    NoDelay,
}

/// Which related objects an iteration walks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IterKind {
    /// Child objects of a scope.
    Children,
    /// Objects driving a signal.
    Drivers,
    /// Objects a signal drives.
    Loads,
    /// Package scopes (only valid from the root).
    PackageScopes,
}

/// Forward-only cursor over objects returned by a backend.
pub type ObjectIter = Box<dyn Iterator<Item = ObjectDesc>>;

/// A simulator adapter.
///
/// Discovery methods return `Ok(None)` for objects that do not exist;
/// errors are reserved for failures of the native layer. Registration
/// returns the backend's own callback value, used later for
/// [`deregister`](Backend::deregister), or
/// [`GpiError::RegistrationFailure`].
pub trait Backend {
    /// Short adapter name (`vpi`, `vhpi`, `model`).
    fn name(&self) -> &str;

    /// Resolves a top-level scope; `None` selects the first one.
    ///
    /// Returns [`GpiError::ObjectNotFound`] when no such root exists.
    fn root(&mut self, name: Option<&str>) -> Result<ObjectDesc, GpiError>;

    /// Finds a child of `parent` by name.
    ///
    /// `parent` may have been issued by another backend in mixed-language
    /// designs; implementations then resolve through its full name.
    fn child_by_name(
        &mut self,
        parent: &ObjectHandle,
        name: &str,
    ) -> Result<Option<ObjectDesc>, GpiError>;

    /// Selects a child of an indexable `parent` by declared index.
    fn child_by_index(
        &mut self,
        parent: &ObjectHandle,
        index: i32,
    ) -> Result<Option<ObjectDesc>, GpiError>;

    /// Starts an iteration rooted at `parent`, or at the simulation root.
    fn iterate(
        &mut self,
        parent: Option<&ObjectHandle>,
        kind: IterKind,
    ) -> Result<ObjectIter, GpiError>;

    /// Reads the current value of `obj`.
    fn get_value(&mut self, obj: &ObjectHandle, format: ValueFormat)
        -> Result<SignalValue, GpiError>;

    /// Writes `value` to `obj`.
    fn set_value(
        &mut self,
        obj: &ObjectHandle,
        value: &SignalValue,
        action: WriteAction,
    ) -> Result<(), GpiError>;

    /// Fires `id` once after `steps` simulator steps.
    fn register_timed(&mut self, steps: u64, id: CallbackId) -> Result<u64, GpiError>;

    /// Fires `id` on every change of `obj` that matches `edge`.
    fn register_value_change(
        &mut self,
        obj: &ObjectHandle,
        edge: Edge,
        id: CallbackId,
    ) -> Result<u64, GpiError>;

    /// Fires `id` once when the simulator reaches `phase`.
    fn register_phase(&mut self, phase: Phase, id: CallbackId) -> Result<u64, GpiError>;

    /// Fires `id` once at a lifecycle event.
    fn register_lifecycle(&mut self, event: LifecycleEvent, id: CallbackId)
        -> Result<u64, GpiError>;

    /// Removes a registration made by this backend.
    fn deregister(&mut self, raw: u64) -> Result<(), GpiError>;

    /// Current simulation time.
    fn sim_time(&self) -> SimTime;

    /// Length of one simulator step.
    fn precision(&self) -> Precision;

    /// Simulator product name.
    fn product(&self) -> String;

    /// Simulator version string.
    fn version(&self) -> String;

    /// Asks the simulator to finish; it stops at its own pace.
    fn sim_end(&mut self);
}
