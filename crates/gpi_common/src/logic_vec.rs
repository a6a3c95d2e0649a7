//! Packed vectors of 9-state logic values and the binary-string wire format.

use crate::logic::Logic;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitXor, Not};

/// A vector of 9-state [`Logic`] values packed for efficient storage.
///
/// Each value occupies 4 bits, 16 values per `u64` word. Index 0 is the
/// least significant bit; the binary-string form is written most
/// significant bit first, independent of any declared HDL range direction.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogicVec {
    width: u32,
    /// Packed storage: 4 bits per logic value, 16 values per u64.
    /// Bits past `width` are always zero so derived equality holds.
    data: Vec<u64>,
}

/// Number of logic values packed per u64 word.
const VALUES_PER_WORD: u32 = 16;

impl LogicVec {
    /// Creates a new `LogicVec` of the given width, initialized to all `Zero`.
    pub fn new(width: u32) -> Self {
        Self::filled(width, Logic::Zero)
    }

    /// Creates a `LogicVec` with every position set to `value`.
    pub fn filled(width: u32, value: Logic) -> Self {
        let pattern = (value as u64) * 0x1111_1111_1111_1111;
        let mut data = vec![pattern; word_count(width)];
        let tail = width % VALUES_PER_WORD;
        if tail != 0 {
            if let Some(last) = data.last_mut() {
                *last &= (1u64 << (tail * 4)) - 1;
            }
        }
        Self { width, data }
    }

    /// Returns the number of logic values in this vector.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Gets the logic value at the given index.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.width()`.
    pub fn get(&self, index: u32) -> Logic {
        assert!(
            index < self.width,
            "index {index} out of bounds for width {}",
            self.width
        );
        let word_idx = (index / VALUES_PER_WORD) as usize;
        let bit_offset = (index % VALUES_PER_WORD) * 4;
        let bits = ((self.data[word_idx] >> bit_offset) & 0xF) as u32;
        Logic::from_enum_index(bits).unwrap_or(Logic::X)
    }

    /// Sets the logic value at the given index.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.width()`.
    pub fn set(&mut self, index: u32, value: Logic) {
        assert!(
            index < self.width,
            "index {index} out of bounds for width {}",
            self.width
        );
        let word_idx = (index / VALUES_PER_WORD) as usize;
        let bit_offset = (index % VALUES_PER_WORD) * 4;
        let mask = !(0xFu64 << bit_offset);
        self.data[word_idx] = (self.data[word_idx] & mask) | ((value as u64) << bit_offset);
    }

    /// Creates a single-bit `LogicVec` from a boolean value.
    pub fn from_bool(value: bool) -> Self {
        Self::from_logic(if value { Logic::One } else { Logic::Zero })
    }

    /// Creates a single-bit `LogicVec` holding `value`.
    pub fn from_logic(value: Logic) -> Self {
        let mut v = Self::new(1);
        v.set(0, value);
        v
    }

    /// Creates a `LogicVec` from a `u64` value with the given width.
    ///
    /// Bits beyond the given width are ignored.
    pub fn from_u64(value: u64, width: u32) -> Self {
        let mut v = Self::new(width);
        for i in 0..width.min(64) {
            if (value >> i) & 1 != 0 {
                v.set(i, Logic::One);
            }
        }
        v
    }

    /// Creates a two's-complement `LogicVec` from a signed value.
    ///
    /// Positions above bit 63 are filled with the sign.
    pub fn from_i64(value: i64, width: u32) -> Self {
        let mut v = Self::from_u64(value as u64, width);
        if value < 0 {
            for i in 64..width {
                v.set(i, Logic::One);
            }
        }
        v
    }

    /// Converts to a `u64` if every position is `0`/`1` (or weak `L`/`H`).
    ///
    /// Returns `None` if the vector holds any other value or is wider
    /// than 64 bits.
    pub fn to_u64(&self) -> Option<u64> {
        if self.width > 64 {
            return None;
        }
        let mut result = 0u64;
        for i in 0..self.width {
            let bit = self.get(i);
            if bit.is_high() {
                result |= 1 << i;
            } else if !bit.is_low() {
                return None;
            }
        }
        Some(result)
    }

    /// Zero-extends the vector into a 32-bit word, read as `i32`.
    ///
    /// `"1111"` is 15; only a 32-bit vector with its top bit set comes out
    /// negative. Vectors wider than 32 bits, or holding non-`0/1` values,
    /// yield `None`.
    pub fn to_i32(&self) -> Option<i32> {
        if self.width == 0 || self.width > 32 {
            return None;
        }
        Some(self.to_u64()? as u32 as i32)
    }

    /// Interprets the vector as a two's-complement integer, extending the
    /// top bit. Same limits as [`to_i32`](Self::to_i32).
    pub fn to_signed_i32(&self) -> Option<i32> {
        if self.width == 0 || self.width > 32 {
            return None;
        }
        let raw = self.to_u64()?;
        let shift = 64 - self.width;
        Some((((raw << shift) as i64) >> shift) as i32)
    }

    /// Returns `true` if every position is `0`, `1`, `L` or `H`.
    pub fn is_resolvable(&self) -> bool {
        (0..self.width).all(|i| {
            let bit = self.get(i);
            bit.is_high() || bit.is_low()
        })
    }

    /// Parses a binary string like `"10XZ"` into a `LogicVec`.
    ///
    /// The leftmost character is the most significant bit (highest index).
    /// Returns `None` if the string contains a character outside
    /// `{0,1,X,Z,U,W,L,H,-}`.
    pub fn from_binary_str(s: &str) -> Option<Self> {
        let width = s.chars().count() as u32;
        let mut v = Self::new(width);
        for (i, c) in s.chars().rev().enumerate() {
            let val = Logic::from_char(c)?;
            v.set(i as u32, val);
        }
        Some(v)
    }

    /// Iterates the values from the most significant position down.
    pub fn iter_msb_first(&self) -> impl Iterator<Item = Logic> + '_ {
        (0..self.width).rev().map(move |i| self.get(i))
    }
}

impl fmt::Display for LogicVec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for bit in self.iter_msb_first() {
            write!(f, "{bit}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for LogicVec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogicVec({self})")
    }
}

impl BitAnd for &LogicVec {
    type Output = LogicVec;

    fn bitand(self, rhs: Self) -> LogicVec {
        assert_eq!(self.width, rhs.width, "LogicVec width mismatch in AND");
        let mut result = LogicVec::new(self.width);
        for i in 0..self.width {
            result.set(i, self.get(i) & rhs.get(i));
        }
        result
    }
}

impl BitOr for &LogicVec {
    type Output = LogicVec;

    fn bitor(self, rhs: Self) -> LogicVec {
        assert_eq!(self.width, rhs.width, "LogicVec width mismatch in OR");
        let mut result = LogicVec::new(self.width);
        for i in 0..self.width {
            result.set(i, self.get(i) | rhs.get(i));
        }
        result
    }
}

impl BitXor for &LogicVec {
    type Output = LogicVec;

    fn bitxor(self, rhs: Self) -> LogicVec {
        assert_eq!(self.width, rhs.width, "LogicVec width mismatch in XOR");
        let mut result = LogicVec::new(self.width);
        for i in 0..self.width {
            result.set(i, self.get(i) ^ rhs.get(i));
        }
        result
    }
}

impl Not for &LogicVec {
    type Output = LogicVec;

    fn not(self) -> LogicVec {
        let mut result = LogicVec::new(self.width);
        for i in 0..self.width {
            result.set(i, !self.get(i));
        }
        result
    }
}

/// Returns the number of u64 words needed to store `width` logic values.
fn word_count(width: u32) -> usize {
    width.div_ceil(VALUES_PER_WORD) as usize
}
