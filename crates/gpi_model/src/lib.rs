//! In-process model simulator for the GPI runtime.
//!
//! This crate stands in for an HDL simulator: it holds a small design of
//! scopes, signals and combinational processes, runs the same time-step
//! phases a real simulator does, and implements the [`gpi_core::Backend`]
//! contract so the runtime can be exercised end to end without one.
//!
//! # Architecture
//!
//! A [`ModelSim`] owns the design and the callback queues. The
//! [`ModelBackend`] shares it with the [`run`] loop through an
//! `Rc<RefCell<_>>`; the loop steps the kernel, releases the borrow and
//! hands each fired callback to [`gpi_core::Runtime::dispatch`], exactly
//! as a native callback trampoline would.
//!
//! # Usage
//!
//! ```ignore
//! use gpi_model::{harness, run, ModelSim};
//!
//! let mut sim = ModelSim::new(Precision::NS);
//! let top = sim.add_scope(None, "top", "top")?;
//! sim.add_signal(top, "clk", 1)?;
//! let (mut rt, sim) = harness(sim, config);
//! rt.initialize(Box::new(StaticEnvironment::new("smoke", |rt| Ok(()))))?;
//! let outcome = run(&sim, &mut rt)?;
//! ```
//!
//! # Modules
//!
//! - `design` — Object tree, builders and discovery
//! - `kernel` — Timers, settling and time-step phases
//! - `backend` — The backend adapter
//! - `driver` — The run loop
//! - `error` — Model error types

#![warn(missing_docs)]

pub mod backend;
pub mod design;
pub mod driver;
pub mod error;
pub mod kernel;

pub use backend::ModelBackend;
pub use design::{ObjId, ProcessFn};
pub use driver::{harness, run, RunOutcome};
pub use error::ModelError;
pub use kernel::{ModelSim, SimStep, DEFAULT_MAX_DELTA};
