// Copyright (C) 2019-2020  Pierre Krieger
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Wraparound-safe comparisons of 32-bit counters.
//!
//! TCP sequence numbers and millisecond timestamps both wrap around. Two values are compared by
//! looking at the sign of their difference, interpreted as a two's-complement 32-bit integer.
//! This gives the correct circular ordering as long as the two values are less than 2^31
//! apart.

/// Returns true if `a` comes strictly before `b`.
pub fn before(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// Returns true if `a` comes before `b` or is equal to it.
pub fn before_or_eq(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) <= 0
}

/// Returns true if `a` comes strictly after `b`.
pub fn after(a: u32, b: u32) -> bool {
    before(b, a)
}

/// Returns true if `a` comes after `b` or is equal to it.
pub fn after_or_eq(a: u32, b: u32) -> bool {
    before_or_eq(b, a)
}

/// Returns true if `value` is in the half-open range `[start, end)`.
pub fn in_range(start: u32, value: u32, end: u32) -> bool {
    before_or_eq(start, value) && before(value, end)
}

/// Returns the number of milliseconds between `since` and `now`. Zero if `now` is before
/// `since`.
pub fn elapsed(since: u32, now: u32) -> u32 {
    if before(now, since) {
        0
    } else {
        now.wrapping_sub(since)
    }
}
