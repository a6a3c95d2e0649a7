//! IEEE 1164 nine-state logic values (`std_ulogic`) with resolution-free operators.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitXor, Not};

/// A single 9-state logic value following IEEE 1164 `std_ulogic`.
///
/// Discriminants follow the VHDL enumeration order so a value can be handed
/// to a VHPI `vhpiEnumVal` without a lookup table.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[repr(u8)]
pub enum Logic {
    /// Uninitialized.
    U = 0,
    /// Forcing unknown.
    X = 1,
    /// Forcing low (0).
    Zero = 2,
    /// Forcing high (1).
    One = 3,
    /// High-impedance (tri-state).
    Z = 4,
    /// Weak unknown.
    W = 5,
    /// Weak low.
    L = 6,
    /// Weak high.
    H = 7,
    /// Don't care.
    DontCare = 8,
}

impl Logic {
    /// All nine values in enumeration order.
    pub const ALL: [Logic; 9] = [
        Logic::U,
        Logic::X,
        Logic::Zero,
        Logic::One,
        Logic::Z,
        Logic::W,
        Logic::L,
        Logic::H,
        Logic::DontCare,
    ];

    /// Converts a binary-string character to a [`Logic`] value.
    ///
    /// Accepts `0 1 X Z U W L H -`, letters in either case.
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '0' => Some(Logic::Zero),
            '1' => Some(Logic::One),
            'x' | 'X' => Some(Logic::X),
            'z' | 'Z' => Some(Logic::Z),
            'u' | 'U' => Some(Logic::U),
            'w' | 'W' => Some(Logic::W),
            'l' | 'L' => Some(Logic::L),
            'h' | 'H' => Some(Logic::H),
            '-' => Some(Logic::DontCare),
            _ => None,
        }
    }

    /// Returns the canonical upper-case character for this value.
    pub fn to_char(self) -> char {
        match self {
            Logic::U => 'U',
            Logic::X => 'X',
            Logic::Zero => '0',
            Logic::One => '1',
            Logic::Z => 'Z',
            Logic::W => 'W',
            Logic::L => 'L',
            Logic::H => 'H',
            Logic::DontCare => '-',
        }
    }

    /// Converts a VHDL `std_ulogic` position back to a value.
    pub fn from_enum_index(index: u32) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    /// Returns `true` for `1` and `H`.
    pub fn is_high(self) -> bool {
        matches!(self, Logic::One | Logic::H)
    }

    /// Returns `true` for `0` and `L`.
    pub fn is_low(self) -> bool {
        matches!(self, Logic::Zero | Logic::L)
    }

    /// Strength-strips the value to `0`, `1` or `X` (`U` is preserved).
    pub fn to_x01(self) -> Self {
        if self.is_high() {
            Logic::One
        } else if self.is_low() {
            Logic::Zero
        } else if self == Logic::U {
            Logic::U
        } else {
            Logic::X
        }
    }
}

impl fmt::Display for Logic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_char())
    }
}

impl BitAnd for Logic {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        let (a, b) = (self.to_x01(), rhs.to_x01());
        if a == Logic::Zero || b == Logic::Zero {
            Logic::Zero
        } else if a == Logic::U || b == Logic::U {
            Logic::U
        } else if a == Logic::One && b == Logic::One {
            Logic::One
        } else {
            Logic::X
        }
    }
}

impl BitOr for Logic {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        let (a, b) = (self.to_x01(), rhs.to_x01());
        if a == Logic::One || b == Logic::One {
            Logic::One
        } else if a == Logic::U || b == Logic::U {
            Logic::U
        } else if a == Logic::Zero && b == Logic::Zero {
            Logic::Zero
        } else {
            Logic::X
        }
    }
}

impl BitXor for Logic {
    type Output = Self;

    fn bitxor(self, rhs: Self) -> Self {
        let (a, b) = (self.to_x01(), rhs.to_x01());
        match (a, b) {
            (Logic::U, _) | (_, Logic::U) => Logic::U,
            (Logic::Zero, Logic::Zero) | (Logic::One, Logic::One) => Logic::Zero,
            (Logic::Zero, Logic::One) | (Logic::One, Logic::Zero) => Logic::One,
            _ => Logic::X,
        }
    }
}

impl Not for Logic {
    type Output = Self;

    fn not(self) -> Self {
        match self.to_x01() {
            Logic::Zero => Logic::One,
            Logic::One => Logic::Zero,
            Logic::U => Logic::U,
            _ => Logic::X,
        }
    }
}
