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

//! TCP header layout and parsing.

use crate::checksum;
use crate::frame::Frame;
use crate::ip::{Datagram, PROTO_TCP};

pub(crate) const FLAG_FIN: u8 = 0x01;
pub(crate) const FLAG_SYN: u8 = 0x02;
pub(crate) const FLAG_RST: u8 = 0x04;
pub(crate) const FLAG_PSH: u8 = 0x08;
pub(crate) const FLAG_ACK: u8 = 0x10;

/// Length of a header without options.
pub(crate) const HEADER_LEN: usize = 20;

const OPTION_END: u8 = 0;
const OPTION_NOP: u8 = 1;
pub(crate) const OPTION_MSS: u8 = 2;

/// Received segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Segment {
    pub(crate) src_port: u16,
    pub(crate) dst_port: u16,
    pub(crate) seq: u32,
    pub(crate) ack: u32,
    pub(crate) flags: u8,
    pub(crate) window: u16,
    /// Value of the MSS option, if present.
    pub(crate) mss: Option<u16>,
    pub(crate) payload_offset: usize,
    pub(crate) payload_len: usize,
}

impl Segment {
    pub(crate) fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    /// Sequence space occupied by the segment. SYN and FIN count for one each.
    pub(crate) fn seq_len(&self) -> u32 {
        self.payload_len as u32 + u32::from(self.has(FLAG_SYN)) + u32::from(self.has(FLAG_FIN))
    }

    pub(crate) fn payload<'a>(&self, frame: &'a Frame) -> &'a [u8] {
        &frame.buffer()[self.payload_offset..self.payload_offset + self.payload_len]
    }
}

/// Validates the header and checksum of the segment carried by `datagram`.
pub(crate) fn parse(frame: &Frame, datagram: &Datagram) -> Option<Segment> {
    let bytes = datagram.payload(frame);
    if bytes.len() < HEADER_LEN {
        log::trace!("Dropping runt TCP segment");
        return None;
    }

    let offset = datagram.payload_offset;
    let header_len = usize::from(frame.read_u8(offset + 12) >> 4) * 4;
    if header_len < HEADER_LEN || header_len > bytes.len() {
        log::trace!("Dropping TCP segment with bad data offset");
        return None;
    }

    if checksum::transport(datagram.src, datagram.dst, PROTO_TCP, bytes) != 0 {
        log::trace!("Dropping TCP segment with bad checksum");
        return None;
    }

    Some(Segment {
        src_port: frame.read_u16(offset),
        dst_port: frame.read_u16(offset + 2),
        seq: frame.read_u32(offset + 4),
        ack: frame.read_u32(offset + 8),
        flags: frame.read_u8(offset + 13),
        window: frame.read_u16(offset + 14),
        mss: parse_mss(&bytes[HEADER_LEN..header_len]),
        payload_offset: offset + header_len,
        payload_len: bytes.len() - header_len,
    })
}

fn parse_mss(mut options: &[u8]) -> Option<u16> {
    loop {
        match *options.first()? {
            OPTION_END => return None,
            OPTION_NOP => options = &options[1..],
            kind => {
                let len = usize::from(*options.get(1)?);
                if len < 2 || len > options.len() {
                    return None;
                }
                if kind == OPTION_MSS && len == 4 {
                    return Some(u16::from_be_bytes([options[2], options[3]]));
                }
                options = &options[len..];
            }
        }
    }
}
