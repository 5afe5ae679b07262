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

//! Internet Protocol version 4.
//!
//! Outgoing datagrams always have a 20 bytes header with the "don't fragment" flag set.
//! Fragmented incoming datagrams aren't reassembled.

use crate::checksum;
use crate::frame::{Frame, BROADCAST_MAC, ETHERTYPE_IPV4, ETH_HEADER_LEN, FRAME_CAPACITY};
use crate::interface::Interface;
use crate::link::LinkDevice;
use std::net::Ipv4Addr;

pub(crate) const PROTO_ICMP: u8 = 1;
pub(crate) const PROTO_TCP: u8 = 6;
pub(crate) const PROTO_UDP: u8 = 17;

/// Offset of the IP header within a frame.
pub(crate) const IP_OFFSET: usize = ETH_HEADER_LEN;
/// Length of the header of the datagrams we send.
pub(crate) const IP_HEADER_LEN: usize = 20;
/// Offset of the payload of the datagrams we send.
pub(crate) const IP_PAYLOAD_OFFSET: usize = IP_OFFSET + IP_HEADER_LEN;
/// Largest payload that fits in an Ethernet frame.
pub(crate) const MAX_IP_PAYLOAD: usize = 1500 - IP_HEADER_LEN;

pub(crate) const LIMITED_BROADCAST: u32 = 0xffff_ffff;

const FLAG_DONT_FRAGMENT: u16 = 0x4000;

/// Header fields of a received datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Datagram {
    pub(crate) src: u32,
    pub(crate) dst: u32,
    pub(crate) protocol: u8,
    /// Offset of the payload within the frame.
    pub(crate) payload_offset: usize,
    pub(crate) payload_len: usize,
}

impl Datagram {
    /// Returns the bytes of the payload.
    pub(crate) fn payload<'a>(&self, frame: &'a Frame) -> &'a [u8] {
        &frame.buffer()[self.payload_offset..self.payload_offset + self.payload_len]
    }
}

impl<L: LinkDevice> Interface<L> {
    /// Sends the datagram whose payload is already at [`IP_PAYLOAD_OFFSET`] in `frame`.
    ///
    /// Returns false if the next hop isn't resolved yet. The datagram is then dropped and the
    /// caller is expected to try again later.
    pub(crate) fn ip_send(
        &mut self,
        frame: &mut Frame,
        dst: u32,
        protocol: u8,
        payload_len: usize,
    ) -> bool {
        let src = self.local_ip();
        self.write_ip_header(frame, src, dst, protocol, payload_len);

        let broadcast = u32::from(self.config.subnet_broadcast());
        if dst == LIMITED_BROADCAST || (dst == broadcast && src != 0) {
            frame.set_dst_mac(BROADCAST_MAC);
        } else {
            let next_hop = if self.config.is_local(Ipv4Addr::from(dst)) {
                dst
            } else {
                u32::from(self.config.gateway)
            };

            if !self.resolve(frame, next_hop) {
                log::trace!("Next hop {} unresolved", Ipv4Addr::from(next_hop));
                return false;
            }
        }

        self.transmit(frame);
        true
    }

    /// Sends the datagram to 255.255.255.255 and the broadcast MAC address, with `src` as
    /// source. Usable before an address is assigned.
    pub(crate) fn ip_send_broadcast(
        &mut self,
        frame: &mut Frame,
        src: u32,
        protocol: u8,
        payload_len: usize,
    ) {
        self.write_ip_header(frame, src, LIMITED_BROADCAST, protocol, payload_len);
        frame.set_dst_mac(BROADCAST_MAC);
        self.transmit(frame);
    }

    fn write_ip_header(
        &mut self,
        frame: &mut Frame,
        src: u32,
        dst: u32,
        protocol: u8,
        payload_len: usize,
    ) {
        let total = IP_HEADER_LEN + payload_len;
        let ident = self.ip_ident;
        self.ip_ident = self.ip_ident.wrapping_add(1);

        frame.set_ethertype(ETHERTYPE_IPV4);
        frame.write_u8(IP_OFFSET, 0x45);
        frame.write_u8(IP_OFFSET + 1, 0);
        frame.write_u16(IP_OFFSET + 2, total as u16);
        frame.write_u16(IP_OFFSET + 4, ident);
        frame.write_u16(IP_OFFSET + 6, FLAG_DONT_FRAGMENT);
        frame.write_u8(IP_OFFSET + 8, self.config.ip_ttl);
        frame.write_u8(IP_OFFSET + 9, protocol);
        frame.write_u16(IP_OFFSET + 10, 0);
        frame.write_u32(IP_OFFSET + 12, src);
        frame.write_u32(IP_OFFSET + 16, dst);

        let sum = checksum::checksum(&frame.buffer()[IP_OFFSET..IP_PAYLOAD_OFFSET]);
        frame.write_u16(IP_OFFSET + 10, sum);
        frame.set_len(ETH_HEADER_LEN + total);
    }

    /// Validates the IP header of a received frame and learns the MAC address of the sender.
    ///
    /// Returns `None` if the datagram is malformed or not addressed to us.
    pub(crate) fn ip_receive(&mut self, frame: &Frame) -> Option<Datagram> {
        if frame.len() < IP_PAYLOAD_OFFSET {
            log::trace!("Dropping runt IP frame");
            return None;
        }

        let version_ihl = frame.read_u8(IP_OFFSET);
        let header_len = usize::from(version_ihl & 0xf) * 4;
        let total = usize::from(frame.read_u16(IP_OFFSET + 2));
        if version_ihl >> 4 != 4
            || header_len < IP_HEADER_LEN
            || total < header_len
            || IP_OFFSET + total > frame.len()
            || IP_OFFSET + total > FRAME_CAPACITY
        {
            log::trace!("Dropping malformed IP header");
            return None;
        }

        // More fragments flag or non-zero fragment offset.
        if frame.read_u16(IP_OFFSET + 6) & 0x3fff != 0 {
            log::trace!("Dropping IP fragment");
            return None;
        }

        let src = frame.read_u32(IP_OFFSET + 12);
        let dst = frame.read_u32(IP_OFFSET + 16);
        if !self.accepts_destination(dst) {
            return None;
        }

        if checksum::checksum(&frame.buffer()[IP_OFFSET..IP_OFFSET + header_len]) != 0 {
            log::trace!("Dropping IP datagram with bad checksum");
            return None;
        }

        if src != 0 && self.config.is_local(Ipv4Addr::from(src)) {
            self.arp.update(src, frame.src_mac());
        }

        Some(Datagram {
            src,
            dst,
            protocol: frame.read_u8(IP_OFFSET + 9),
            payload_offset: IP_OFFSET + header_len,
            payload_len: total - header_len,
        })
    }

    fn accepts_destination(&self, dst: u32) -> bool {
        let local = self.local_ip();
        if dst == LIMITED_BROADCAST || (local != 0 && dst == local) {
            return true;
        }
        if local != 0 && dst == u32::from(self.config.subnet_broadcast()) {
            return true;
        }
        if self.dhcp_active {
            return local == 0 || (self.dhcp_offered != 0 && dst == self.dhcp_offered);
        }
        false
    }
}
