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

//! Network interface.
//!
//! The [`Interface`] groups what every protocol needs in order to put a frame on the wire: the
//! link device, the configuration, the frame pool, the ARP cache and the IP identification
//! counter. The ARP, IP, ICMP and UDP modules each add methods to it.

use crate::arp::ArpCache;
use crate::config::Config;
use crate::frame::{Frame, FramePool};
use crate::icmp::IcmpStats;
use crate::link::LinkDevice;

pub(crate) struct Interface<L> {
    pub(crate) link: L,
    pub(crate) config: Config,
    pub(crate) frames: FramePool,
    pub(crate) arp: ArpCache,
    /// Identification field of the next outgoing IP datagram.
    pub(crate) ip_ident: u16,
    /// True while the DHCP client is negotiating an address. Relaxes the destination filter
    /// of incoming datagrams.
    pub(crate) dhcp_active: bool,
    /// Address offered by a DHCP server, or 0.
    pub(crate) dhcp_offered: u32,
    pub(crate) icmp_stats: IcmpStats,
}

impl<L: LinkDevice> Interface<L> {
    pub(crate) fn new(link: L, config: Config) -> Self {
        Interface {
            link,
            frames: FramePool::new(config.frame_count),
            arp: ArpCache::new(config.arp_cache_size, config.arp_timeout_ticks),
            ip_ident: 0,
            dhcp_active: false,
            dhcp_offered: 0,
            icmp_stats: IcmpStats::default(),
            config,
        }
    }

    /// Returns the local IP address as a number. Zero if unconfigured.
    pub(crate) fn local_ip(&self) -> u32 {
        u32::from(self.config.ip)
    }

    /// Fills the source address of the frame, pads it, and hands it to the link device.
    ///
    /// The destination address, type field, and length must already be set.
    pub(crate) fn transmit(&mut self, frame: &mut Frame) {
        frame.set_src_mac(self.config.mac_address);
        frame.pad_to_minimum();
        self.link.send(frame);
    }
}
