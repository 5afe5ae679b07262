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

//! Configuration of a [`NetStack`](crate::NetStack).

use std::net::Ipv4Addr;

/// Configuration of the network stack.
///
/// The addresses are updated by the DHCP client when it acquires a lease. Everything else is
/// fixed for the lifetime of the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Link-layer address of the local interface.
    pub mac_address: [u8; 6],
    /// Local IPv4 address. [`Ipv4Addr::UNSPECIFIED`] if not configured yet.
    pub ip: Ipv4Addr,
    /// Subnet mask of the local network.
    pub netmask: Ipv4Addr,
    /// Router that datagrams to non-local addresses are sent to.
    pub gateway: Ipv4Addr,
    /// DNS server used by the resolver. [`Ipv4Addr::UNSPECIFIED`] if none.
    pub dns_server: Ipv4Addr,
    /// If true, [`NetStack::init`](crate::NetStack::init) starts the DHCP client.
    pub dhcp: bool,

    /// Number of frames in the frame pool.
    pub frame_count: usize,
    /// Maximum number of simultaneously bound UDP sockets.
    pub udp_sockets: usize,
    /// Maximum number of simultaneous TCP connections, listeners included.
    pub tcp_connections: usize,

    /// Time-to-live of outgoing IP datagrams.
    pub ip_ttl: u8,

    /// Maximum segment size advertised to TCP peers.
    pub tcp_mss: u16,
    /// Size in bytes of each of the two stream buffers of a TCP connection.
    pub tcp_buffer_size: usize,
    /// Time after which unacknowledged TCP data is retransmitted.
    pub tcp_retransmit_timeout_ms: u32,
    /// Number of retransmissions after which a TCP connection is aborted.
    pub tcp_max_retransmits: u32,
    /// A TCP connection whose peer has been silent for that long is aborted instead of
    /// retransmitting. Also bounds the time spent in `LAST_ACK`.
    pub tcp_give_up_ms: u32,
    /// Time a TCP connection stays in `TIME_WAIT`.
    pub tcp_time_wait_ms: u32,

    /// Number of entries of the ARP cache.
    pub arp_cache_size: usize,
    /// Number of main loop iterations during which an ARP request is considered pending.
    pub arp_timeout_ticks: u32,

    /// Time after which an unanswered DHCP message is sent again.
    pub dhcp_retry_ms: u32,
    /// Number of retries after which the DHCP client gives up and restarts.
    pub dhcp_max_retries: u32,
    /// Renewal time, in thousandths of the lease duration, when the server doesn't provide it.
    pub dhcp_t1_permille: u32,
    /// Rebinding time, in thousandths of the lease duration, when the server doesn't provide
    /// it.
    pub dhcp_t2_permille: u32,

    /// Time after which an unanswered DNS query is sent again.
    pub dns_timeout_ms: u32,
    /// Number of times a DNS query is sent before giving up.
    pub dns_max_retries: u32,
    /// Maximum time an answer stays in the DNS cache, whatever its TTL.
    pub dns_max_ttl_ms: u32,
    /// Number of entries of the DNS cache.
    pub dns_cache_size: usize,
}

impl Config {
    /// Returns true if `addr` is on the local subnet.
    pub fn is_local(&self, addr: Ipv4Addr) -> bool {
        let mask = u32::from(self.netmask);
        (u32::from(addr) & mask) == (u32::from(self.ip) & mask)
    }

    /// Returns the broadcast address of the local subnet.
    pub fn subnet_broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.ip) | !u32::from(self.netmask))
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mac_address: [0x02, 0x00, 0x00, 0x00, 0x00, 0x01],
            ip: Ipv4Addr::new(192, 168, 0, 123),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            gateway: Ipv4Addr::new(192, 168, 0, 1),
            dns_server: Ipv4Addr::UNSPECIFIED,
            dhcp: false,
            frame_count: 8,
            udp_sockets: 4,
            tcp_connections: 4,
            ip_ttl: 64,
            tcp_mss: 1460,
            tcp_buffer_size: 4096,
            tcp_retransmit_timeout_ms: 1000,
            tcp_max_retransmits: 8,
            tcp_give_up_ms: 60_000,
            tcp_time_wait_ms: 2000,
            arp_cache_size: 8,
            arp_timeout_ticks: 2000,
            dhcp_retry_ms: 4000,
            dhcp_max_retries: 4,
            dhcp_t1_permille: 500,
            dhcp_t2_permille: 875,
            dns_timeout_ms: 5000,
            dns_max_retries: 3,
            dns_max_ttl_ms: 300_000,
            dns_cache_size: 5,
        }
    }
}
