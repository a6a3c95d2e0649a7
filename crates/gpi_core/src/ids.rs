//! Opaque ID newtypes for runtime records.
//!
//! Arena-backed IDs are thin `u32` wrappers created by
//! [`Arena::alloc`](crate::arena::Arena::alloc). [`CallbackId`] is a counter
//! rather than an index: it travels through the simulator as callback user
//! data and must never be reused while the process lives.

use serde::{Deserialize, Serialize};
use std::fmt;

define_id!(
    /// Opaque, copyable ID for a task owned by the scheduler.
    TaskId
);

define_id!(
    /// Opaque, copyable ID for a clock driver.
    ClockId
);

define_id!(
    /// Opaque, copyable ID tagging every handle with the backend that issued it.
    BackendId
);

/// Identifies one registered callback in the dispatch table.
///
/// This is the value handed to the simulator as callback user data; the
/// native layer turns it back into a `CallbackId` with [`from_raw`](Self::from_raw)
/// before dispatching.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct CallbackId(u64);

impl CallbackId {
    /// Creates an ID from the raw user-data value.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw user-data value.
    pub fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cb{}", self.0)
    }
}

/// Identifies one pending scheduler wait (one native registration).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct WaitId(pub(crate) u64);
