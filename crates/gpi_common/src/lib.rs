//! Shared foundational types used across the GPI simulation-control runtime.
//!
//! This crate provides 9-state logic values (IEEE 1164 `std_ulogic`), packed
//! logic vectors with the binary-string wire format, simulator time with its
//! precision, and interned hierarchical names.

#![warn(missing_docs)]

pub mod ident;
pub mod logic;
pub mod logic_vec;
pub mod time;

pub use ident::{Ident, Interner};
pub use logic::Logic;
pub use logic_vec::LogicVec;
pub use time::{ParseTimeUnitError, Precision, SimTime, TimeUnit};
