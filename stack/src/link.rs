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

//! Link-layer device.
//!
//! The stack doesn't know how frames reach the wire. It is given an implementation of
//! [`LinkDevice`] that does the physical transmission and reception.

use crate::frame::{Frame, BROADCAST_MAC};

/// Device that transmits and receives Ethernet frames.
pub trait LinkDevice {
    /// Brings the link up. Returns true if the link is up.
    fn init(&mut self) -> bool;

    /// Checks whether a frame has been received. If so, copies it into `frame`, sets the
    /// length of `frame`, and returns true.
    ///
    /// Must not block.
    fn receive(&mut self, frame: &mut Frame) -> bool;

    /// Transmits a frame. The length of the frame is already set and the frame is at least
    /// [`MIN_FRAME_LEN`](crate::frame::MIN_FRAME_LEN) bytes long.
    fn send(&mut self, frame: &Frame);

    /// Returns true if `frame` is destined to `local`, either directly or through broadcast.
    fn is_for_us(&self, frame: &Frame, local: &[u8; 6]) -> bool {
        let dst = frame.dst_mac();
        dst == *local || dst == BROADCAST_MAC
    }
}

impl<'a, T: ?Sized + LinkDevice> LinkDevice for &'a mut T {
    fn init(&mut self) -> bool {
        (**self).init()
    }

    fn receive(&mut self, frame: &mut Frame) -> bool {
        (**self).receive(frame)
    }

    fn send(&mut self, frame: &Frame) {
        (**self).send(frame)
    }

    fn is_for_us(&self, frame: &Frame, local: &[u8; 6]) -> bool {
        (**self).is_for_us(frame, local)
    }
}
