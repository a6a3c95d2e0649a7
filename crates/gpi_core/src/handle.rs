//! Backend-tagged handles to simulation objects and registered callbacks.
//!
//! An [`ObjectHandle`] is created once per discovered object and cached
//! information travels with it, so introspection never goes back to the
//! simulator. Identity is the pair (backend, native value): two handles for
//! the same native object compare equal and hash alike regardless of how
//! they were found.

use crate::ids::{BackendId, CallbackId};
use gpi_common::Logic;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// The kind of simulation object a handle refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    /// Not classified by the backend.
    Unknown,
    /// Verilog memory (unpacked array of registers).
    Memory,
    /// Module, entity or other hierarchy scope.
    Module,
    /// Net or VHDL signal of a non-logic type.
    Net,
    /// Verilog register or variable.
    Register,
    /// Single logic bit (`std_logic`, `logic`).
    Logic,
    /// Packed vector of logic bits.
    LogicArray,
    /// Unpacked array of objects.
    Array,
    /// Enumeration-typed object.
    Enum,
    /// Unpacked structure or record.
    Structure,
    /// Packed structure.
    PackedStructure,
    /// Real-valued object.
    Real,
    /// Integer-valued object.
    Integer,
    /// String-valued object.
    String,
    /// Generate block array.
    GenArray,
    /// Package scope.
    Package,
}

impl ObjectType {
    /// Whether objects of this type own child objects.
    pub fn is_scope(self) -> bool {
        matches!(
            self,
            ObjectType::Module
                | ObjectType::Structure
                | ObjectType::GenArray
                | ObjectType::Package
                | ObjectType::Array
                | ObjectType::Memory
        )
    }
}

/// Direction of a declared range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RangeDirection {
    /// `left to right`, left <= right.
    Ascending,
    /// `left downto right`, left >= right.
    Descending,
    /// The backend could not tell.
    Undefined,
}

/// A declared index range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    /// Left bound as declared.
    pub left: i32,
    /// Right bound as declared.
    pub right: i32,
    /// Declared direction.
    pub dir: RangeDirection,
}

impl Range {
    /// Builds a range and infers its direction from the bounds.
    pub fn new(left: i32, right: i32) -> Self {
        let dir = if left <= right {
            RangeDirection::Ascending
        } else {
            RangeDirection::Descending
        };
        Self { left, right, dir }
    }

    /// Number of indices covered.
    pub fn len(&self) -> u64 {
        u64::from(self.left.abs_diff(self.right)) + 1
    }

    /// Indices from `left` to `right`, in declaration order.
    pub fn indices(&self) -> Box<dyn Iterator<Item = i32>> {
        if self.left <= self.right {
            Box::new(self.left..=self.right)
        } else {
            Box::new((self.right..=self.left).rev())
        }
    }

    /// A range always covers at least one index.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether `index` falls inside the range.
    pub fn contains(&self, index: i32) -> bool {
        let (lo, hi) = if self.left <= self.right {
            (self.left, self.right)
        } else {
            (self.right, self.left)
        };
        (lo..=hi).contains(&index)
    }
}

/// Everything a backend reports about an object when it is discovered.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectDesc {
    /// Backend-issued native value (pointer or index), nonzero.
    pub raw: u64,
    /// Leaf name.
    pub name: String,
    /// Full hierarchical name.
    pub full_name: String,
    /// Object type.
    pub kind: ObjectType,
    /// Constants (parameters, generics) refuse writes.
    pub is_const: bool,
    /// Whether children can be selected by index.
    pub indexable: bool,
    /// Number of elements (bits for vectors, entries for arrays).
    pub num_elems: Option<u32>,
    /// Declared range, when the object has one.
    pub range: Option<Range>,
    /// Definition (module or entity) name for scopes.
    pub definition_name: Option<String>,
    /// Source file of the definition.
    pub definition_file: Option<String>,
}

impl ObjectDesc {
    /// Creates a description with every optional attribute unset.
    pub fn new(
        raw: u64,
        name: impl Into<String>,
        full_name: impl Into<String>,
        kind: ObjectType,
    ) -> Self {
        Self {
            raw,
            name: name.into(),
            full_name: full_name.into(),
            kind,
            is_const: false,
            indexable: false,
            num_elems: None,
            range: None,
            definition_name: None,
            definition_file: None,
        }
    }
}

/// Opaque, cheaply cloned reference to one simulation object.
#[derive(Clone)]
pub struct ObjectHandle {
    backend: BackendId,
    desc: Rc<ObjectDesc>,
}

impl ObjectHandle {
    /// Wraps a backend description, tagging it with the issuing backend.
    pub fn new(backend: BackendId, desc: ObjectDesc) -> Self {
        Self {
            backend,
            desc: Rc::new(desc),
        }
    }

    /// The backend that issued this handle.
    pub fn backend(&self) -> BackendId {
        self.backend
    }

    /// The backend-issued native value.
    pub fn raw(&self) -> u64 {
        self.desc.raw
    }

    /// Leaf name.
    pub fn name(&self) -> &str {
        &self.desc.name
    }

    /// Full hierarchical name.
    pub fn full_name(&self) -> &str {
        &self.desc.full_name
    }

    /// Object type.
    pub fn kind(&self) -> ObjectType {
        self.desc.kind
    }

    /// Whether the object is a constant.
    pub fn is_const(&self) -> bool {
        self.desc.is_const
    }

    /// Whether children can be selected by index.
    pub fn is_indexable(&self) -> bool {
        self.desc.indexable
    }

    /// Number of elements, if known.
    pub fn num_elems(&self) -> Option<u32> {
        self.desc.num_elems
    }

    /// Declared range, if any.
    pub fn range(&self) -> Option<Range> {
        self.desc.range
    }

    /// Definition name for scopes.
    pub fn definition_name(&self) -> Option<&str> {
        self.desc.definition_name.as_deref()
    }

    /// Definition source file for scopes.
    pub fn definition_file(&self) -> Option<&str> {
        self.desc.definition_file.as_deref()
    }
}

impl PartialEq for ObjectHandle {
    fn eq(&self, other: &Self) -> bool {
        self.backend == other.backend && self.desc.raw == other.desc.raw
    }
}

impl Eq for ObjectHandle {}

impl Hash for ObjectHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.backend.hash(state);
        self.desc.raw.hash(state);
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ObjectHandle({:?} {} {:#x} {})",
            self.desc.kind,
            self.desc.full_name,
            self.desc.raw,
            self.backend.as_raw()
        )
    }
}

/// Signal edge selected by a value-change registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Edge {
    /// Fires when the new value is high.
    Rising,
    /// Fires when the new value is low.
    Falling,
    /// Fires on every value change.
    Any,
}

impl Edge {
    /// Whether a change leaving the least significant bit at `lsb` passes
    /// this filter. Values without bits only pass [`Edge::Any`].
    pub fn accepts(self, lsb: Option<Logic>) -> bool {
        match self {
            Edge::Any => true,
            Edge::Rising => lsb.is_some_and(Logic::is_high),
            Edge::Falling => lsb.is_some_and(Logic::is_low),
        }
    }
}

/// Simulation phase within one time step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Values may still be written; the simulator settles again afterwards.
    ReadWrite,
    /// Values are final for the time step and must not be written.
    ReadOnly,
    /// Start of the next time step that has scheduled activity.
    NextTimeStep,
}

/// Simulation lifecycle events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleEvent {
    /// The simulator is about to run time zero.
    StartOfSim,
    /// The simulator is shutting down.
    EndOfSim,
}

/// What a callback registration waits for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    /// Relative delay in simulator steps.
    Timed,
    /// Value change filtered by edge.
    ValueChange(Edge),
    /// Simulation phase.
    Phase(Phase),
    /// Start or end of simulation.
    Lifecycle(LifecycleEvent),
}

impl CallbackKind {
    /// Value-change callbacks keep firing until removed; everything else
    /// fires once.
    pub fn is_repeating(self) -> bool {
        matches!(self, CallbackKind::ValueChange(_))
    }

    /// The phase a firing of this callback runs in, if it is a phase callback.
    pub fn phase(self) -> Option<Phase> {
        match self {
            CallbackKind::Phase(phase) => Some(phase),
            _ => None,
        }
    }
}

/// Reference to one registered native callback.
///
/// A handle has exactly one owner and is not `Clone`. Passing it to
/// [`Runtime::deregister`](crate::Runtime::deregister) consumes it;
/// deregistering a one-shot callback that already fired is a no-op.
#[derive(Debug, PartialEq, Eq)]
pub struct CallbackHandle {
    id: CallbackId,
    backend: BackendId,
    raw: u64,
    kind: CallbackKind,
}

impl CallbackHandle {
    pub(crate) fn new(id: CallbackId, backend: BackendId, raw: u64, kind: CallbackKind) -> Self {
        Self {
            id,
            backend,
            raw,
            kind,
        }
    }

    /// Dispatch-table key and native user data.
    pub fn id(&self) -> CallbackId {
        self.id
    }

    /// Backend holding the native registration.
    pub fn backend(&self) -> BackendId {
        self.backend
    }

    /// Backend-issued native callback value.
    pub fn raw(&self) -> u64 {
        self.raw
    }

    /// What the callback waits for.
    pub fn kind(&self) -> CallbackKind {
        self.kind
    }
}
