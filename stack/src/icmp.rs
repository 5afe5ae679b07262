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

//! Internet Control Message Protocol.

use crate::checksum;
use crate::frame::{Frame, FRAME_CAPACITY};
use crate::interface::Interface;
use crate::ip::{self, Datagram, IP_OFFSET, IP_PAYLOAD_OFFSET, PROTO_ICMP};
use crate::link::LinkDevice;
use std::net::Ipv4Addr;

const TYPE_ECHO_REPLY: u8 = 0;
const TYPE_DEST_UNREACHABLE: u8 = 3;
const TYPE_ECHO_REQUEST: u8 = 8;

pub(crate) const CODE_PORT_UNREACHABLE: u8 = 3;

const ICMP_HEADER_LEN: usize = 8;

/// Counters of the echo ("ping") responder.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IcmpStats {
    /// Number of valid echo requests received.
    pub echo_requests: u32,
    /// Number of echo replies transmitted.
    pub echo_replies: u32,
    /// Number of echo requests that couldn't be answered, because no frame was available or
    /// because the address of the sender wasn't resolved.
    pub echo_reply_failures: u32,
}

impl<L: LinkDevice> Interface<L> {
    /// Processes a received ICMP message.
    pub(crate) fn icmp_receive(&mut self, frame: &Frame, datagram: &Datagram) {
        let message = datagram.payload(frame);
        if message.len() < ICMP_HEADER_LEN {
            log::trace!("Dropping runt ICMP message");
            return;
        }
        if checksum::checksum(message) != 0 {
            log::trace!("Dropping ICMP message with bad checksum");
            return;
        }

        match message[0] {
            TYPE_ECHO_REQUEST => {
                self.icmp_stats.echo_requests = self.icmp_stats.echo_requests.wrapping_add(1);
                if self.send_echo_reply(message, datagram.src) {
                    self.icmp_stats.echo_replies = self.icmp_stats.echo_replies.wrapping_add(1);
                } else {
                    self.icmp_stats.echo_reply_failures =
                        self.icmp_stats.echo_reply_failures.wrapping_add(1);
                }
            }
            ty => log::trace!("Ignoring ICMP message of type {}", ty),
        }
    }

    fn send_echo_reply(&mut self, request: &[u8], dst: u32) -> bool {
        if request.len() > FRAME_CAPACITY - IP_PAYLOAD_OFFSET {
            return false;
        }

        let mut reply = match self.frames.alloc() {
            Some(f) => f,
            None => return false,
        };

        reply.copy_from(IP_PAYLOAD_OFFSET, request);
        reply.write_u8(IP_PAYLOAD_OFFSET, TYPE_ECHO_REPLY);
        reply.write_u16(IP_PAYLOAD_OFFSET + 2, 0);
        let sum = checksum::checksum(
            &reply.buffer()[IP_PAYLOAD_OFFSET..IP_PAYLOAD_OFFSET + request.len()],
        );
        reply.write_u16(IP_PAYLOAD_OFFSET + 2, sum);

        let sent = self.ip_send(&mut reply, dst, PROTO_ICMP, request.len());
        self.frames.free(reply);
        sent
    }

    /// Sends a destination unreachable message to the sender of `datagram`, quoting its
    /// header and the first 8 bytes of its payload.
    pub(crate) fn send_dest_unreachable(&mut self, frame: &Frame, datagram: &Datagram, code: u8) {
        // Never answer to broadcasts.
        if datagram.dst == ip::LIMITED_BROADCAST
            || datagram.dst == u32::from(self.config.subnet_broadcast())
            || datagram.src == 0
        {
            return;
        }

        let header_len = datagram.payload_offset - IP_OFFSET;
        let quoted_len = header_len + datagram.payload_len.min(8);

        let mut message = match self.frames.alloc() {
            Some(f) => f,
            None => return,
        };

        message.write_u8(IP_PAYLOAD_OFFSET, TYPE_DEST_UNREACHABLE);
        message.write_u8(IP_PAYLOAD_OFFSET + 1, code);
        message.write_u16(IP_PAYLOAD_OFFSET + 2, 0);
        message.write_u32(IP_PAYLOAD_OFFSET + 4, 0);
        message.copy_from(
            IP_PAYLOAD_OFFSET + ICMP_HEADER_LEN,
            &frame.buffer()[IP_OFFSET..IP_OFFSET + quoted_len],
        );

        let len = ICMP_HEADER_LEN + quoted_len;
        let sum = checksum::checksum(&message.buffer()[IP_PAYLOAD_OFFSET..IP_PAYLOAD_OFFSET + len]);
        message.write_u16(IP_PAYLOAD_OFFSET + 2, sum);

        log::trace!(
            "Destination unreachable (code {}) to {}",
            code,
            Ipv4Addr::from(datagram.src)
        );
        self.ip_send(&mut message, datagram.src, PROTO_ICMP, len);
        self.frames.free(message);
    }
}
