//! Simulator-loadable GPI library.
//!
//! Built as a `cdylib`, this crate is what an HDL simulator loads. Each
//! enabled procedural interface exports its startup table; the simulator
//! calls the listed routine, which resolves the runtime configuration from
//! the environment, brings up a [`gpi_core::Runtime`] over that interface
//! and registers the start and end of simulation hooks. Every native
//! callback then lands in one trampoline that turns the packed user data
//! back into a [`gpi_core::CallbackId`] and dispatches it.
//!
//! # Features
//!
//! - `vpi` (default) — Verilog/SystemVerilog simulators, exports
//!   `vlog_startup_routines`
//! - `vhpi` — VHDL simulators, exports `vhpi_startup_routines`
//!
//! Enabling both yields one library usable by mixed-language simulators;
//! whichever interface starts first owns the runtime and the other joins it
//! as an additional backend.

#![warn(missing_docs)]

mod host;

#[cfg(feature = "vhpi")]
pub mod vhpi;
#[cfg(feature = "vpi")]
pub mod vpi;

#[cfg(feature = "vhpi")]
pub use vhpi::VhpiBackend;
#[cfg(feature = "vpi")]
pub use vpi::VpiBackend;
