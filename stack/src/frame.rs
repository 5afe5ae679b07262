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

//! Ethernet frame buffers.
//!
//! A [`Frame`] is a fixed-capacity byte buffer holding one Ethernet frame, header included.
//! All the protocol layers read and write their fields through the big-endian accessors of
//! this type.
//!
//! Frames are allocated from a [`FramePool`] containing a fixed number of them. Allocating
//! moves a frame out of the pool, and freeing moves it back in.

use byteorder::{BigEndian, ByteOrder as _};
use core::fmt;

/// Number of bytes a [`Frame`] can hold.
pub const FRAME_CAPACITY: usize = 1536;

/// Length of the Ethernet header at the start of each frame.
pub const ETH_HEADER_LEN: usize = 14;

/// Frames shorter than this are padded with zeroes before being transmitted.
pub const MIN_FRAME_LEN: usize = 60;

/// Value of the Ethernet type field for IPv4 payloads.
pub const ETHERTYPE_IPV4: u16 = 0x0800;

/// Value of the Ethernet type field for ARP payloads.
pub const ETHERTYPE_ARP: u16 = 0x0806;

/// Link-layer broadcast address.
pub const BROADCAST_MAC: [u8; 6] = [0xff; 6];

/// One Ethernet frame.
///
/// Accesses beyond [`FRAME_CAPACITY`] are rejected: reads yield zero and writes are discarded.
pub struct Frame {
    data: Box<[u8; FRAME_CAPACITY]>,
    len: usize,
    in_use: bool,
}

impl Frame {
    /// Builds a new empty frame that doesn't belong to any pool.
    pub fn new() -> Frame {
        Frame {
            data: Box::new([0; FRAME_CAPACITY]),
            len: 0,
            in_use: false,
        }
    }

    /// Returns the number of meaningful bytes in the frame.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the frame has no meaningful byte.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Sets the number of meaningful bytes. Clamped to [`FRAME_CAPACITY`].
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(FRAME_CAPACITY);
    }

    /// Returns true if the frame is currently allocated from its pool.
    pub fn is_in_use(&self) -> bool {
        self.in_use
    }

    /// Returns the meaningful bytes of the frame.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Returns the whole underlying buffer, regardless of the length.
    pub fn buffer(&self) -> &[u8] {
        &self.data[..]
    }

    /// Returns the whole underlying buffer, regardless of the length.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.data[..]
    }

    /// Reads the byte at the given offset.
    pub fn read_u8(&self, offset: usize) -> u8 {
        self.data.get(offset).copied().unwrap_or(0)
    }

    /// Writes the byte at the given offset.
    pub fn write_u8(&mut self, offset: usize, value: u8) {
        if let Some(b) = self.data.get_mut(offset) {
            *b = value;
        }
    }

    /// Reads a big-endian 16-bit value at the given offset.
    pub fn read_u16(&self, offset: usize) -> u16 {
        match self.data.get(offset..offset.saturating_add(2)) {
            Some(bytes) => BigEndian::read_u16(bytes),
            None => 0,
        }
    }

    /// Writes a big-endian 16-bit value at the given offset.
    pub fn write_u16(&mut self, offset: usize, value: u16) {
        if let Some(bytes) = self.data.get_mut(offset..offset.saturating_add(2)) {
            BigEndian::write_u16(bytes, value);
        }
    }

    /// Reads a big-endian 32-bit value at the given offset.
    pub fn read_u32(&self, offset: usize) -> u32 {
        match self.data.get(offset..offset.saturating_add(4)) {
            Some(bytes) => BigEndian::read_u32(bytes),
            None => 0,
        }
    }

    /// Writes a big-endian 32-bit value at the given offset.
    pub fn write_u32(&mut self, offset: usize, value: u32) {
        if let Some(bytes) = self.data.get_mut(offset..offset.saturating_add(4)) {
            BigEndian::write_u32(bytes, value);
        }
    }

    /// Copies bytes starting at `offset` into `dest`. Returns the number of bytes copied, which
    /// is less than `dest.len()` if the end of the buffer is reached.
    pub fn copy_to(&self, offset: usize, dest: &mut [u8]) -> usize {
        let available = FRAME_CAPACITY.saturating_sub(offset);
        let n = dest.len().min(available);
        if n != 0 {
            dest[..n].copy_from_slice(&self.data[offset..offset + n]);
        }
        n
    }

    /// Copies `src` into the buffer starting at `offset`. Returns the number of bytes copied,
    /// which is less than `src.len()` if the end of the buffer is reached.
    pub fn copy_from(&mut self, offset: usize, src: &[u8]) -> usize {
        let available = FRAME_CAPACITY.saturating_sub(offset);
        let n = src.len().min(available);
        if n != 0 {
            self.data[offset..offset + n].copy_from_slice(&src[..n]);
        }
        n
    }

    /// Sets `len` bytes starting at `offset` to zero.
    pub fn zero(&mut self, offset: usize, len: usize) {
        let end = offset.saturating_add(len).min(FRAME_CAPACITY);
        if offset < end {
            for b in &mut self.data[offset..end] {
                *b = 0;
            }
        }
    }

    /// Returns the destination address of the Ethernet header.
    pub fn dst_mac(&self) -> [u8; 6] {
        let mut out = [0; 6];
        self.copy_to(0, &mut out);
        out
    }

    /// Sets the destination address of the Ethernet header.
    pub fn set_dst_mac(&mut self, mac: [u8; 6]) {
        self.copy_from(0, &mac);
    }

    /// Returns the source address of the Ethernet header.
    pub fn src_mac(&self) -> [u8; 6] {
        let mut out = [0; 6];
        self.copy_to(6, &mut out);
        out
    }

    /// Sets the source address of the Ethernet header.
    pub fn set_src_mac(&mut self, mac: [u8; 6]) {
        self.copy_from(6, &mac);
    }

    /// Returns the type field of the Ethernet header.
    pub fn ethertype(&self) -> u16 {
        self.read_u16(12)
    }

    /// Sets the type field of the Ethernet header.
    pub fn set_ethertype(&mut self, ty: u16) {
        self.write_u16(12, ty);
    }

    /// Pads the frame with zeroes up to [`MIN_FRAME_LEN`].
    pub fn pad_to_minimum(&mut self) {
        if self.len < MIN_FRAME_LEN {
            self.zero(self.len, MIN_FRAME_LEN - self.len);
            self.len = MIN_FRAME_LEN;
        }
    }
}

impl Default for Frame {
    fn default() -> Self {
        Frame::new()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Frame")
            .field("len", &self.len)
            .field("in_use", &self.in_use)
            .finish()
    }
}

/// Fixed-size pool of [`Frame`]s.
pub struct FramePool {
    /// Frames that are currently available. `None` for slots whose frame is allocated.
    slots: Vec<Option<Frame>>,
}

impl FramePool {
    /// Builds a new pool containing `count` frames.
    pub fn new(count: usize) -> FramePool {
        FramePool {
            slots: (0..count).map(|_| Some(Frame::new())).collect(),
        }
    }

    /// Allocates a frame from the pool. Returns `None` if all the frames are in use.
    ///
    /// The returned frame has a length of zero. Its buffer still contains whatever was
    /// written to it during its previous use.
    pub fn alloc(&mut self) -> Option<Frame> {
        let mut frame = self.slots.iter_mut().find_map(|slot| slot.take())?;
        frame.in_use = true;
        frame.len = 0;
        Some(frame)
    }

    /// Gives back a frame to the pool.
    pub fn free(&mut self, mut frame: Frame) {
        frame.in_use = false;
        if let Some(slot) = self.slots.iter_mut().find(|slot| slot.is_none()) {
            *slot = Some(frame);
        } else {
            log::warn!("Freed a frame that doesn't belong to the pool");
        }
    }

    /// Returns the number of frames that can currently be allocated.
    pub fn available(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Returns the total number of frames managed by this pool.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl fmt::Debug for FramePool {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FramePool")
            .field("available", &self.available())
            .field("capacity", &self.capacity())
            .finish()
    }
}
