//! Simulation-control runtime for HDL simulators.
//!
//! This crate lets test code written as cooperative tasks observe and drive
//! a running simulation. It discovers design objects, reads and writes their
//! values, and suspends tasks until simulator events (edges, delays, phases)
//! occur. Simulator-specific procedural interfaces sit behind the
//! [`Backend`] trait; everything above it is backend independent.
//!
//! # Architecture
//!
//! A single [`Runtime`] value owns all state: the backend [`Registry`], the
//! callback [`Dispatch`] table, the task [`Scheduler`] and the clocks. The
//! simulator calls back into the runtime only through
//! [`Runtime::dispatch`], which runs one handler at a time and refuses
//! nested entry. Tasks are [`Resumable`] state machines; each yielded
//! [`Trigger`] becomes one native callback registration whose firing
//! resumes every task waiting on it.
//!
//! # Modules
//!
//! - `arena` — Dense ID-keyed storage
//! - `backend` — The simulator adapter contract and value formats
//! - `clock` — Self-rearming clock drivers
//! - `dispatch` — Callback table and re-entrancy guard
//! - `entry` — Process start, first time step and end of simulation hooks
//! - `error` — Runtime and task error types
//! - `handle` — Object and callback handles
//! - `logging` — `tracing` subscriber setup
//! - `registry` — Routing of operations to the owning backend
//! - `runtime` — The runtime context object
//! - `scheduler` — Cooperative task scheduler
//! - `task` — Resumable tasks and their context
//! - `trigger` — Wait conditions

#![warn(missing_docs)]

#[macro_use]
pub mod arena;
pub mod backend;
pub mod clock;
pub mod dispatch;
pub mod entry;
pub mod error;
pub mod handle;
pub mod ids;
pub mod logging;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod task;
pub mod trigger;

#[cfg(test)]
mod testing;

pub use arena::{Arena, ArenaId};
pub use backend::{Backend, IterKind, ObjectIter, SignalValue, ValueFormat, WriteAction};
pub use clock::GpiClock;
pub use dispatch::{Dispatch, DispatchStats, Handler, UserHandler};
pub use entry::{EntryFn, ImageEnvironment, StaticEnvironment, TestEnvironment};
pub use error::{GpiError, TaskError};
pub use handle::{
    CallbackHandle, CallbackKind, Edge, LifecycleEvent, ObjectDesc, ObjectHandle, ObjectType,
    Phase, Range, RangeDirection,
};
pub use ids::{BackendId, CallbackId, ClockId, TaskId};
pub use registry::{Handles, Registry};
pub use runtime::{RunState, Runtime};
pub use scheduler::Scheduler;
pub use task::{
    FnTask, Resumable, Step, TaskContext, TaskFailure, TaskResult, TaskState, TaskValue, Wake,
};
pub use trigger::Trigger;
