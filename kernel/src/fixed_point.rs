/*
 * This file is part of a small educational kernel core.
 *
 * This program is free software: you can redistribute it and/or modify it
 * under the terms of the GNU General Public License as published by the Free
 * Software Foundation, either version 3 of the License, or (at your option)
 * any later version.
 *
 * This program is distributed in the hope that it will be useful, but
 * WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General
 * Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along
 * with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! 17.14 signed fixed-point arithmetic, used by the MLFQ accountant for `recent_cpu`
//! and `load_avg`.
//!
//! The representation is a plain `i32` scaled by `2^14`; intermediate multiplications
//! and divisions are promoted to `i64` so they never overflow for values the scheduler
//! actually produces.

use core::ops::{Add, Sub};

/// The scaling factor of the 17.14 representation (`2^14`).
const SCALE: i32 = 1 << 14;

/// A 17.14 signed fixed-point number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Fixed(i32);

impl Fixed {
    /// The fixed-point representation of zero.
    pub const ZERO: Fixed = Fixed(0);

    /// Converts an integer to fixed-point.
    pub const fn from_int(n: i32) -> Fixed {
        Fixed(n * SCALE)
    }

    /// Truncates towards zero back to an integer.
    pub const fn to_int_trunc(self) -> i32 {
        self.0 / SCALE
    }

    /// Rounds to the nearest integer, ties resolved away from zero per the sign of the
    /// value (matches the original `convert_to_int_nearest`).
    pub const fn to_int_nearest(self) -> i32 {
        if self.0 >= 0 {
            (self.0 + SCALE / 2) / SCALE
        } else {
            (self.0 - SCALE / 2) / SCALE
        }
    }

    /// Multiplies two fixed-point numbers, promoting to 64 bits so the intermediate
    /// product cannot overflow.
    pub const fn mul(self, rhs: Fixed) -> Fixed {
        Fixed(((self.0 as i64 * rhs.0 as i64) / SCALE as i64) as i32)
    }

    /// Multiplies a fixed-point number by an integer.
    pub const fn mul_int(self, rhs: i32) -> Fixed {
        Fixed(self.0 * rhs)
    }

    /// Divides two fixed-point numbers, promoting to 64 bits so the intermediate
    /// product cannot overflow.
    pub const fn div(self, rhs: Fixed) -> Fixed {
        Fixed(((self.0 as i64 * SCALE as i64) / rhs.0 as i64) as i32)
    }

    /// Divides a fixed-point number by an integer.
    pub const fn div_int(self, rhs: i32) -> Fixed {
        Fixed(self.0 / rhs)
    }

    /// Adds an integer, converting it to fixed-point first.
    pub const fn add_int(self, rhs: i32) -> Fixed {
        Fixed(self.0 + rhs * SCALE)
    }

    /// Subtracts an integer, converting it to fixed-point first.
    pub const fn sub_int(self, rhs: i32) -> Fixed {
        Fixed(self.0 - rhs * SCALE)
    }

    /// Returns `self * 100`, rounded to the nearest integer.
    ///
    /// Used by `thread_get_load_avg`/`thread_get_recent_cpu`, which report fixed-point
    /// quantities to userspace as "value times 100, rounded".
    pub const fn to_percent_rounded(self) -> i32 {
        self.mul_int(100).to_int_nearest()
    }
}

impl Add for Fixed {
    type Output = Fixed;

    fn add(self, rhs: Fixed) -> Fixed {
        Fixed(self.0 + rhs.0)
    }
}

impl Sub for Fixed {
    type Output = Fixed;

    fn sub(self, rhs: Fixed) -> Fixed {
        Fixed(self.0 - rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_round_trip_truncating() {
        for n in [-100, -1, 0, 1, 100, 12345] {
            assert_eq!(Fixed::from_int(n).to_int_trunc(), n);
        }
    }

    #[test]
    fn int_round_trip_nearest() {
        for n in [-100, -1, 0, 1, 100, 12345] {
            assert_eq!(Fixed::from_int(n).to_int_nearest(), n);
        }
    }

    #[test]
    fn nearest_rounds_half_away_from_zero() {
        // 7/4 = 1.75 -> rounds to 2; -7/4 = -1.75 -> rounds to -2.
        let seven = Fixed::from_int(7);
        let four = Fixed::from_int(4);
        assert_eq!(seven.div(four).to_int_nearest(), 2);
        assert_eq!((Fixed::ZERO - seven).div(four).to_int_nearest(), -2);
    }

    #[test]
    fn addition_commutes() {
        let a = Fixed::from_int(3).add_int(1);
        let b = Fixed::from_int(2).mul_int(2);
        assert_eq!(a + b, b + a);
    }

    #[test]
    fn mul_div_is_approximately_identity() {
        let a = Fixed::from_int(7);
        let b = Fixed::from_int(3);
        let back = a.mul(b).div(b);
        // Within +-1 ulp of the fixed-point representation.
        assert!((back.0 - a.0).abs() <= 1);
    }

    #[test]
    fn large_products_do_not_overflow() {
        // recent_cpu and load_avg stay well below this, but the multiplication path
        // must not wrap even near i32::MAX scaled values.
        let big = Fixed::from_int(1 << 16);
        let half = Fixed::from_int(1).div_int(2);
        let _ = big.mul(half);
    }

    #[test]
    fn percent_rounded_half_is_fifty() {
        // 0.5 * 100 = 50.
        let half = Fixed::from_int(1).div_int(2);
        assert_eq!(half.to_percent_rounded(), 50);
    }
}
