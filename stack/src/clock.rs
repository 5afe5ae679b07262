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

//! Source of time for the stack.

/// Monotonic millisecond counter.
///
/// The counter is allowed to wrap around. All the timeouts of the stack are computed with
/// [`seq`](crate::seq) comparisons, and are correct as long as no timeout exceeds 2^31
/// milliseconds.
pub trait Clock {
    /// Returns the current value of the counter.
    fn now_ms(&self) -> u32;
}

impl<'a, T: ?Sized + Clock> Clock for &'a T {
    fn now_ms(&self) -> u32 {
        (**self).now_ms()
    }
}
