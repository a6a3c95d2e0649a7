//! Simulator time expressed in simulator steps, plus the precision that gives
//! a step its physical length.
//!
//! The simulator reports time as an integer number of steps; one step lasts
//! `10^precision` seconds. [`SimTime`] carries the raw step count and
//! [`Precision`] converts between steps and physical units.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Femtoseconds per picosecond.
pub const FS_PER_PS: u64 = 1_000;
/// Femtoseconds per nanosecond.
pub const FS_PER_NS: u64 = 1_000_000;
/// Femtoseconds per microsecond.
pub const FS_PER_US: u64 = 1_000_000_000;
/// Femtoseconds per millisecond.
pub const FS_PER_MS: u64 = 1_000_000_000_000;
/// Femtoseconds per second.
pub const FS_PER_S: u64 = 1_000_000_000_000_000;

/// A point in simulated time, counted in simulator steps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct SimTime {
    /// Number of simulator steps since time zero.
    pub steps: u64,
}

impl SimTime {
    /// Time zero.
    pub fn zero() -> Self {
        Self { steps: 0 }
    }

    /// Creates a time from a raw step count.
    pub fn from_steps(steps: u64) -> Self {
        Self { steps }
    }

    /// Splits the step count into the `(high, low)` words used by VPI and VHPI.
    pub fn to_words(self) -> (u32, u32) {
        ((self.steps >> 32) as u32, self.steps as u32)
    }

    /// Reassembles a time from `(high, low)` words.
    pub fn from_words(high: u32, low: u32) -> Self {
        Self {
            steps: (u64::from(high) << 32) | u64::from(low),
        }
    }

    /// Returns a value that displays this time in physical units.
    pub fn display(self, precision: Precision) -> ScaledTime {
        ScaledTime {
            time: self,
            precision,
        }
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} steps", self.steps)
    }
}

/// Physical time units accepted when building timers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    /// Femtoseconds.
    Fs,
    /// Picoseconds.
    Ps,
    /// Nanoseconds.
    Ns,
    /// Microseconds.
    Us,
    /// Milliseconds.
    Ms,
    /// Seconds.
    S,
    /// Raw simulator steps, independent of precision.
    Step,
}

impl TimeUnit {
    /// Power-of-ten exponent of one unit in seconds, `None` for [`TimeUnit::Step`].
    pub fn exponent(self) -> Option<i8> {
        match self {
            TimeUnit::Fs => Some(-15),
            TimeUnit::Ps => Some(-12),
            TimeUnit::Ns => Some(-9),
            TimeUnit::Us => Some(-6),
            TimeUnit::Ms => Some(-3),
            TimeUnit::S => Some(0),
            TimeUnit::Step => None,
        }
    }
}

/// Error returned when a time unit string is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown time unit '{0}'")]
pub struct ParseTimeUnitError(pub String);

impl FromStr for TimeUnit {
    type Err = ParseTimeUnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fs" => Ok(TimeUnit::Fs),
            "ps" => Ok(TimeUnit::Ps),
            "ns" => Ok(TimeUnit::Ns),
            "us" => Ok(TimeUnit::Us),
            "ms" => Ok(TimeUnit::Ms),
            "s" | "sec" => Ok(TimeUnit::S),
            "step" | "steps" => Ok(TimeUnit::Step),
            _ => Err(ParseTimeUnitError(s.to_string())),
        }
    }
}

/// Simulator time precision: one step lasts `10^exponent` seconds.
///
/// Typical values range from -15 (1 fs) to 0 (1 s).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Precision(pub i8);

impl Precision {
    /// One picosecond per step, the default of most Verilog simulators.
    pub const PS: Precision = Precision(-12);
    /// One femtosecond per step.
    pub const FS: Precision = Precision(-15);
    /// One nanosecond per step.
    pub const NS: Precision = Precision(-9);

    /// Converts `amount` of `unit` into a whole number of steps.
    ///
    /// Returns `None` when the amount is not an exact multiple of one step
    /// or the result overflows.
    pub fn to_steps(self, amount: u64, unit: TimeUnit) -> Option<u64> {
        let Some(exp) = unit.exponent() else {
            return Some(amount);
        };
        let diff = i32::from(exp) - i32::from(self.0);
        if diff >= 0 {
            amount.checked_mul(10u64.checked_pow(diff as u32)?)
        } else {
            let div = 10u64.checked_pow((-diff) as u32)?;
            if amount % div == 0 {
                Some(amount / div)
            } else {
                None
            }
        }
    }

    /// Converts a step count to femtoseconds, `None` on overflow or when a
    /// step is shorter than a femtosecond.
    pub fn steps_to_fs(self, steps: u64) -> Option<u64> {
        let diff = i32::from(self.0) + 15;
        if diff < 0 {
            return None;
        }
        steps.checked_mul(10u64.checked_pow(diff as u32)?)
    }
}

impl Default for Precision {
    fn default() -> Self {
        Precision::PS
    }
}

/// A [`SimTime`] paired with its [`Precision`] for human-readable display.
#[derive(Clone, Copy, Debug)]
pub struct ScaledTime {
    time: SimTime,
    precision: Precision,
}

impl fmt::Display for ScaledTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(fs) = self.precision.steps_to_fs(self.time.steps) else {
            return write!(f, "{}", self.time);
        };
        if fs == 0 {
            write!(f, "0 fs")
        } else if fs >= FS_PER_S && fs.is_multiple_of(FS_PER_S) {
            write!(f, "{} s", fs / FS_PER_S)
        } else if fs >= FS_PER_MS && fs.is_multiple_of(FS_PER_MS) {
            write!(f, "{} ms", fs / FS_PER_MS)
        } else if fs >= FS_PER_US && fs.is_multiple_of(FS_PER_US) {
            write!(f, "{} us", fs / FS_PER_US)
        } else if fs >= FS_PER_NS && fs.is_multiple_of(FS_PER_NS) {
            write!(f, "{} ns", fs / FS_PER_NS)
        } else if fs >= FS_PER_PS && fs.is_multiple_of(FS_PER_PS) {
            write!(f, "{} ps", fs / FS_PER_PS)
        } else {
            write!(f, "{fs} fs")
        }
    }
}
