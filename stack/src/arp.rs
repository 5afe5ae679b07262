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

//! Address Resolution Protocol (RFC 826).
//!
//! Resolution is asynchronous: a cache miss sends a broadcast request and reports failure to
//! the caller, which is expected to try again later. Replies, and more generally any ARP frame
//! received, feed the cache.

use crate::frame::{Frame, BROADCAST_MAC, ETHERTYPE_ARP, ETHERTYPE_IPV4, ETH_HEADER_LEN};
use crate::interface::Interface;
use crate::link::LinkDevice;
use std::net::Ipv4Addr;

const OP_REQUEST: u16 = 1;
const OP_REPLY: u16 = 2;

/// Length of an ARP packet for Ethernet and IPv4.
const ARP_LEN: usize = 28;

// Offsets within the frame.
const HTYPE: usize = ETH_HEADER_LEN;
const PTYPE: usize = ETH_HEADER_LEN + 2;
const HLEN: usize = ETH_HEADER_LEN + 4;
const PLEN: usize = ETH_HEADER_LEN + 5;
const OPER: usize = ETH_HEADER_LEN + 6;
const SHA: usize = ETH_HEADER_LEN + 8;
const SPA: usize = ETH_HEADER_LEN + 14;
const THA: usize = ETH_HEADER_LEN + 18;
const TPA: usize = ETH_HEADER_LEN + 24;

/// Fixed-size table of IPv4 to MAC mappings with least-recently-used eviction.
#[derive(Debug)]
pub(crate) struct ArpCache {
    entries: Vec<Entry>,
    capacity: usize,
    /// Incremented every time an entry is used. Entries remember the value at their last use.
    age_clock: u32,
    /// Address of the outstanding request, if any.
    pending: Option<Pending>,
    timeout_ticks: u32,
}

#[derive(Debug)]
struct Entry {
    ip: u32,
    mac: [u8; 6],
    last_use: u32,
}

#[derive(Debug)]
struct Pending {
    ip: u32,
    ticks_left: u32,
}

impl ArpCache {
    pub(crate) fn new(capacity: usize, timeout_ticks: u32) -> Self {
        ArpCache {
            entries: Vec::with_capacity(capacity),
            capacity,
            age_clock: 0,
            pending: None,
            timeout_ticks,
        }
    }

    /// Returns the MAC address of `ip`, if known, and marks the entry as recently used.
    pub(crate) fn lookup(&mut self, ip: u32) -> Option<[u8; 6]> {
        if ip == 0 {
            return None;
        }
        self.age_clock = self.age_clock.wrapping_add(1);
        let now = self.age_clock;
        let entry = self.entries.iter_mut().find(|e| e.ip == ip)?;
        entry.last_use = now;
        Some(entry.mac)
    }

    /// Inserts or updates a mapping. Evicts the least recently used entry if the cache is full.
    pub(crate) fn update(&mut self, ip: u32, mac: [u8; 6]) {
        if ip == 0 || self.capacity == 0 {
            return;
        }

        if self.pending.as_ref().map_or(false, |p| p.ip == ip) {
            self.pending = None;
        }

        self.age_clock = self.age_clock.wrapping_add(1);
        let now = self.age_clock;

        if let Some(entry) = self.entries.iter_mut().find(|e| e.ip == ip) {
            entry.mac = mac;
            entry.last_use = now;
            return;
        }

        let entry = Entry {
            ip,
            mac,
            last_use: now,
        };

        if self.entries.len() < self.capacity {
            self.entries.push(entry);
        } else if let Some(oldest) = self.entries.iter_mut().min_by_key(|e| e.last_use) {
            log::trace!("ARP cache full, evicting {}", Ipv4Addr::from(oldest.ip));
            *oldest = entry;
        }
    }

    /// Decrements the timeout of the outstanding request.
    pub(crate) fn tick(&mut self) {
        if let Some(pending) = &mut self.pending {
            pending.ticks_left = pending.ticks_left.saturating_sub(1);
            if pending.ticks_left == 0 {
                self.pending = None;
            }
        }
    }

    /// Records that a request for `ip` is about to be sent. Returns false if a request for
    /// this address is already outstanding, in which case nothing should be sent.
    fn begin_request(&mut self, ip: u32) -> bool {
        if self.pending.as_ref().map_or(false, |p| p.ip == ip) {
            return false;
        }
        self.pending = Some(Pending {
            ip,
            ticks_left: self.timeout_ticks,
        });
        true
    }

    /// Returns the address of the outstanding request, if any.
    #[cfg(test)]
    pub(crate) fn pending(&self) -> Option<u32> {
        self.pending.as_ref().map(|p| p.ip)
    }
}

impl<L: LinkDevice> Interface<L> {
    /// Writes the MAC address of `ip` as the destination of `frame`.
    ///
    /// Returns false if the address isn't known yet. In that case a request is broadcast,
    /// unless one is already outstanding for the same address.
    pub(crate) fn resolve(&mut self, frame: &mut Frame, ip: u32) -> bool {
        if let Some(mac) = self.arp.lookup(ip) {
            frame.set_dst_mac(mac);
            return true;
        }

        if ip != 0 && self.arp.begin_request(ip) {
            log::debug!("ARP request for {}", Ipv4Addr::from(ip));
            self.send_arp(OP_REQUEST, BROADCAST_MAC, [0; 6], ip);
        }

        false
    }

    /// Processes a received ARP frame.
    ///
    /// The sender mapping is always learned. Requests targeting the local address are
    /// answered.
    pub(crate) fn process_arp(&mut self, frame: &Frame) {
        if frame.len() < ETH_HEADER_LEN + ARP_LEN
            || frame.read_u16(HTYPE) != 1
            || frame.read_u16(PTYPE) != ETHERTYPE_IPV4
            || frame.read_u8(HLEN) != 6
            || frame.read_u8(PLEN) != 4
        {
            log::trace!("Dropping malformed ARP frame");
            return;
        }

        let mut sender_mac = [0; 6];
        frame.copy_to(SHA, &mut sender_mac);
        let sender_ip = frame.read_u32(SPA);
        self.arp.update(sender_ip, sender_mac);

        let local_ip = self.local_ip();
        if frame.read_u16(OPER) == OP_REQUEST && local_ip != 0 && frame.read_u32(TPA) == local_ip
        {
            self.send_arp(OP_REPLY, sender_mac, sender_mac, sender_ip);
        }
    }

    /// Broadcasts an unsolicited reply announcing the local address.
    pub(crate) fn send_gratuitous_arp(&mut self) {
        log::debug!("Gratuitous ARP for {}", self.config.ip);
        let local_ip = self.local_ip();
        self.send_arp(OP_REPLY, BROADCAST_MAC, BROADCAST_MAC, local_ip);
    }

    fn send_arp(&mut self, op: u16, dst_mac: [u8; 6], target_mac: [u8; 6], target_ip: u32) {
        let mut frame = match self.frames.alloc() {
            Some(f) => f,
            None => {
                log::debug!("No frame available for ARP");
                return;
            }
        };

        frame.set_dst_mac(dst_mac);
        frame.set_ethertype(ETHERTYPE_ARP);
        frame.write_u16(HTYPE, 1);
        frame.write_u16(PTYPE, ETHERTYPE_IPV4);
        frame.write_u8(HLEN, 6);
        frame.write_u8(PLEN, 4);
        frame.write_u16(OPER, op);
        frame.copy_from(SHA, &self.config.mac_address);
        frame.write_u32(SPA, self.local_ip());
        frame.copy_from(THA, &target_mac);
        frame.write_u32(TPA, target_ip);
        frame.set_len(ETH_HEADER_LEN + ARP_LEN);

        self.transmit(&mut frame);
        self.frames.free(frame);
    }
}
