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

use crate::clock::Clock;
use crate::config::Config;
use crate::dhcp::{self, DhcpClient, DhcpState};
use crate::dns::{self, DnsError, DnsResolver};
use crate::frame::{Frame, ETHERTYPE_ARP, ETHERTYPE_IPV4, ETH_HEADER_LEN};
use crate::icmp::{IcmpStats, CODE_PORT_UNREACHABLE};
use crate::interface::Interface;
use crate::ip::{Datagram, PROTO_ICMP, PROTO_TCP, PROTO_UDP};
use crate::link::LinkDevice;
use crate::seq;
use crate::tcp::{self, TcpConnections, TcpError, TcpHandle, TcpListener, TcpState};
use crate::udp::{self, UdpError, UdpHandle, UdpSockets};

use core::fmt;
use rand::Rng as _;
use rand_chacha::ChaCha20Rng;
use rand_core::SeedableRng as _;
use std::net::{Ipv4Addr, SocketAddrV4};

/// TCP/IP stack bound to one link device.
///
/// The stack does nothing on its own. [`NetStack::poll`] must be called regularly, and each
/// call performs a bounded amount of work: at most one received frame is processed and one
/// TCP connection is serviced.
///
/// All the operations return immediately, except for [`NetStack::dns_resolve`] which runs the
/// main loop until the query completes.
pub struct NetStack<L, C> {
    iface: Interface<L>,
    clock: C,
    tcp: TcpConnections,
    udp: UdpSockets,
    dhcp: DhcpClient,
    dns: DnsResolver,
}

impl<L: LinkDevice, C: Clock> NetStack<L, C> {
    /// Builds a new stack. The link isn't touched until [`NetStack::init`] is called.
    pub fn new(link: L, clock: C, config: Config) -> Self {
        // The random sequences (ports, sequence numbers, query identifiers) are derived from
        // the time of creation and the MAC address.
        let mac = config
            .mac_address
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
        let mut rng = ChaCha20Rng::seed_from_u64((u64::from(clock.now_ms()) << 32) ^ mac);

        NetStack {
            tcp: TcpConnections::new(config.tcp_connections, config.tcp_buffer_size, rng.gen()),
            udp: UdpSockets::new(config.udp_sockets, rng.gen()),
            dhcp: DhcpClient::new(),
            dns: DnsResolver::new(config.dns_cache_size, rng.gen()),
            iface: Interface::new(link, config),
            clock,
        }
    }

    /// Brings the link up, and starts the DHCP client if the configuration enables it.
    ///
    /// Returns false if the link device failed to initialise.
    pub fn init(&mut self) -> bool {
        if !self.iface.link.init() {
            log::warn!("Link device failed to initialise");
            return false;
        }

        log::info!(
            "Interface up (MAC {:02x?}, IP {})",
            self.iface.config.mac_address,
            self.iface.config.ip
        );

        if self.iface.config.dhcp {
            self.dhcp_start();
        }
        true
    }

    /// Returns the current configuration, including the addresses obtained through DHCP.
    pub fn config(&self) -> &Config {
        &self.iface.config
    }

    /// Runs one iteration of the main loop.
    pub fn poll(&mut self) {
        let now = self.clock.now_ms();

        if let Some(mut frame) = self.iface.frames.alloc() {
            if self.iface.link.receive(&mut frame) {
                self.dispatch(&frame, now);
            }
            self.iface.frames.free(frame);
        }

        if let Some(slot) = self.tcp.next_to_poll() {
            tcp::output::poll(&mut self.iface, self.tcp.slot_mut(slot), now);
        }

        self.iface.arp.tick();
        self.dhcp.poll(&mut self.iface, now);
    }

    fn dispatch(&mut self, frame: &Frame, now: u32) {
        if frame.len() < ETH_HEADER_LEN
            || !self
                .iface
                .link
                .is_for_us(frame, &self.iface.config.mac_address)
        {
            return;
        }

        match frame.ethertype() {
            ETHERTYPE_ARP => self.iface.process_arp(frame),
            ETHERTYPE_IPV4 => {
                let datagram = match self.iface.ip_receive(frame) {
                    Some(d) => d,
                    None => return,
                };
                match datagram.protocol {
                    PROTO_ICMP => self.iface.icmp_receive(frame, &datagram),
                    PROTO_TCP => {
                        tcp::input::process(&mut self.iface, &mut self.tcp, frame, &datagram, now)
                    }
                    PROTO_UDP => self.udp_input(frame, &datagram, now),
                    other => log::trace!("Ignoring IP protocol {}", other),
                }
            }
            other => log::trace!("Ignoring ethertype {:#06x}", other),
        }
    }

    fn udp_input(&mut self, frame: &Frame, datagram: &Datagram, now: u32) {
        let header = match udp::parse(frame, datagram) {
            Some(h) => h,
            None => return,
        };
        let payload = header.payload(frame);

        if header.dst_port == dhcp::CLIENT_PORT && self.dhcp.is_running() {
            self.dhcp.receive(&mut self.iface, payload, now);
            return;
        }

        if self.dns.pending_port() == Some(header.dst_port) {
            self.dns.receive(payload);
            return;
        }

        let from = SocketAddrV4::new(Ipv4Addr::from(datagram.src), header.src_port);
        if !self.udp.deliver(header.dst_port, from, payload) {
            log::trace!("No UDP socket on port {}", header.dst_port);
            self.iface
                .send_dest_unreachable(frame, datagram, CODE_PORT_UNREACHABLE);
        }
    }

    /// Opens a connection to a remote host. A SYN is sent immediately if the address of the
    /// next hop is known, otherwise when the connection is polled.
    pub fn tcp_connect(&mut self, ip: Ipv4Addr, port: u16) -> Result<TcpHandle, TcpError> {
        let now = self.clock.now_ms();
        let local_port = self.tcp.pick_ephemeral().ok_or(TcpError::NoEphemeralPort)?;
        let slot = self.tcp.new_connection(local_port, now)?;
        let iss = self.tcp.next_iss(now);

        let conn = self.tcp.slot_mut(slot);
        conn.remote_ip = u32::from(ip);
        conn.remote_port = port;
        conn.set_iss(iss);
        conn.set_state(TcpState::SynSent, now);
        log::debug!("TCP {}: connecting to {}:{}", local_port, ip, port);
        tcp::output::send_segment(&mut self.iface, conn, now);

        Ok(self.tcp.handle(slot))
    }

    /// Waits for a connection on `port`. The handle reaches [`TcpState::Established`] once a
    /// peer has connected.
    pub fn tcp_listen(&mut self, port: u16) -> Result<TcpHandle, TcpError> {
        let now = self.clock.now_ms();
        let slot = self.tcp.new_connection(port, now)?;
        let conn = self.tcp.slot_mut(slot);
        conn.passive = true;
        conn.set_state(TcpState::Listen, now);
        Ok(self.tcp.handle(slot))
    }

    /// Starts listening on `port`, for use with [`NetStack::tcp_accept`].
    pub fn tcp_listener(&mut self, port: u16) -> Result<TcpListener, TcpError> {
        let handle = self.tcp_listen(port)?;
        Ok(TcpListener {
            port,
            current: Some(handle),
        })
    }

    /// Returns the connection of the listener if a peer has connected, and starts listening
    /// again on a new record.
    ///
    /// If the pool is full, listening resumes on a later call.
    pub fn tcp_accept(&mut self, listener: &mut TcpListener) -> Option<TcpHandle> {
        let state = listener.current.map(|h| self.tcp_state(h));
        match state {
            Some(TcpState::Established) | Some(TcpState::CloseWait) => {
                let accepted = listener.current.take();
                listener.current = self.relisten(listener.port);
                accepted
            }
            None | Some(TcpState::Closed) => {
                listener.current = self.relisten(listener.port);
                None
            }
            Some(_) => None,
        }
    }

    fn relisten(&mut self, port: u16) -> Option<TcpHandle> {
        match self.tcp_listen(port) {
            Ok(handle) => Some(handle),
            Err(err) => {
                log::debug!("Can't listen again on TCP port {}: {}", port, err);
                None
            }
        }
    }

    /// Moves received bytes into `buf`. Returns the number of bytes read, which is zero if
    /// nothing is available.
    pub fn tcp_read(&mut self, handle: TcpHandle, buf: &mut [u8]) -> Result<usize, TcpError> {
        let conn = self.tcp.get_mut(handle).ok_or(TcpError::InvalidHandle)?;
        Ok(conn.rx.read(buf))
    }

    /// Queues bytes for sending. Returns the number of bytes queued, which is less than
    /// `data.len()` if the send buffer is full.
    pub fn tcp_write(&mut self, handle: TcpHandle, data: &[u8]) -> Result<usize, TcpError> {
        let now = self.clock.now_ms();
        let conn = self.tcp.get_mut(handle).ok_or(TcpError::InvalidHandle)?;
        if conn.fin_queued {
            return Err(TcpError::WriteClosed);
        }
        if !conn.state.can_send() {
            return Err(TcpError::NotConnected);
        }
        let written = conn.tx.write(data);
        if written != 0 {
            tcp::output::send_segment(&mut self.iface, conn, now);
        }
        Ok(written)
    }

    /// Closes the sending side of a connection. Bytes already queued are still delivered,
    /// followed by a FIN. Receiving is still possible until the peer closes its side.
    ///
    /// A listening or connecting record is freed immediately.
    pub fn tcp_close(&mut self, handle: TcpHandle) -> Result<(), TcpError> {
        let now = self.clock.now_ms();
        let conn = self.tcp.get_mut(handle).ok_or(TcpError::InvalidHandle)?;
        match conn.state {
            TcpState::Listen | TcpState::SynSent => conn.free(),
            TcpState::SynReceived => conn.fin_queued = true,
            TcpState::Established => {
                conn.fin_queued = true;
                conn.set_state(TcpState::FinWait1, now);
                tcp::output::send_segment(&mut self.iface, conn, now);
            }
            TcpState::CloseWait => {
                conn.fin_queued = true;
                conn.set_state(TcpState::LastAck, now);
                tcp::output::send_segment(&mut self.iface, conn, now);
            }
            _ => {}
        }
        Ok(())
    }

    /// Returns the state of a connection. Stale handles are reported as closed.
    pub fn tcp_state(&self, handle: TcpHandle) -> TcpState {
        self.tcp.get(handle).map_or(TcpState::Closed, |c| c.state)
    }

    /// Returns the number of bytes waiting to be read.
    pub fn tcp_available(&self, handle: TcpHandle) -> usize {
        self.tcp.get(handle).map_or(0, |c| c.rx.len())
    }

    /// Returns the number of bytes that [`NetStack::tcp_write`] would currently accept.
    pub fn tcp_send_space(&self, handle: TcpHandle) -> usize {
        self.tcp
            .get(handle)
            .filter(|c| c.state.can_send() && !c.fin_queued)
            .map_or(0, |c| c.tx.free())
    }

    /// Returns the address of the peer, if known.
    pub fn tcp_remote(&self, handle: TcpHandle) -> Option<SocketAddrV4> {
        self.tcp
            .get(handle)
            .filter(|c| c.state != TcpState::Listen)
            .map(|c| SocketAddrV4::new(Ipv4Addr::from(c.remote_ip), c.remote_port))
    }

    /// Returns true if the peer has closed its side and every received byte has been read.
    /// Also true for stale handles.
    pub fn tcp_is_eof(&self, handle: TcpHandle) -> bool {
        self.tcp
            .get(handle)
            .map_or(true, |c| c.rx.is_closed() && c.rx.len() == 0)
    }

    /// Binds a socket to `port`.
    pub fn udp_open(&mut self, port: u16) -> Result<UdpHandle, UdpError> {
        self.udp.open(port)
    }

    /// Binds a socket to a random port of the ephemeral range.
    pub fn udp_open_ephemeral(&mut self) -> Result<UdpHandle, UdpError> {
        self.udp.open_ephemeral()
    }

    /// Returns the local port of a socket.
    pub fn udp_local_port(&self, handle: UdpHandle) -> Result<u16, UdpError> {
        self.udp.port(handle).ok_or(UdpError::InvalidHandle)
    }

    /// Unbinds a socket. Any unread datagram is discarded.
    pub fn udp_close(&mut self, handle: UdpHandle) -> Result<(), UdpError> {
        if self.udp.close(handle) {
            Ok(())
        } else {
            Err(UdpError::InvalidHandle)
        }
    }

    /// Sends a datagram from the port of `handle`.
    ///
    /// Returns [`UdpError::AddressPending`] if the address of the next hop isn't known yet.
    /// The datagram is then dropped, and sending it again later is expected to succeed.
    pub fn udp_send(
        &mut self,
        handle: UdpHandle,
        ip: Ipv4Addr,
        port: u16,
        data: &[u8],
    ) -> Result<(), UdpError> {
        let local_port = self.udp_local_port(handle)?;
        self.iface
            .udp_send_direct(local_port, SocketAddrV4::new(ip, port), data)
    }

    /// Sends a datagram to 255.255.255.255 from the port of `handle`.
    pub fn udp_send_broadcast(
        &mut self,
        handle: UdpHandle,
        port: u16,
        data: &[u8],
    ) -> Result<(), UdpError> {
        let local_port = self.udp_local_port(handle)?;
        let src = self.iface.local_ip();
        self.iface.udp_send_broadcast(src, local_port, port, data)
    }

    /// Moves the pending datagram of a socket into `buf`. Returns its length, truncated to the
    /// length of `buf`, and its source.
    pub fn udp_receive(
        &mut self,
        handle: UdpHandle,
        buf: &mut [u8],
    ) -> Result<Option<(usize, SocketAddrV4)>, UdpError> {
        self.udp.take(handle, buf)
    }

    /// Returns true if a datagram is waiting to be read.
    pub fn udp_has_data(&self, handle: UdpHandle) -> Result<bool, UdpError> {
        self.udp.has_data(handle)
    }

    /// Resolves a name into an IPv4 address.
    ///
    /// Blocks, running [`NetStack::poll`] in a loop, until an answer is received or every
    /// attempt has timed out. The clock must advance while this function runs.
    pub fn dns_resolve(&mut self, name: &str) -> Result<Ipv4Addr, DnsError> {
        let name = dns::validate_name(name)?;

        if let Some(addr) = self.dns.cached(name, self.clock.now_ms()) {
            log::trace!("DNS cache hit for {}", name);
            return Ok(addr);
        }

        let server = self.iface.config.dns_server;
        if server.is_unspecified() {
            return Err(DnsError::NoServer);
        }

        let port = self.udp.reserve_ephemeral().ok_or(DnsError::NoPort)?;
        let id = self.dns.begin(port);
        let query = dns::build_query(id, name);
        let result = self.dns_exchange(SocketAddrV4::new(server, dns::SERVER_PORT), port, &query);
        self.dns.end();
        self.udp.release_port(port);

        match result {
            Ok((addr, ttl)) => {
                let ttl_ms = (u64::from(ttl) * 1000).min(u64::from(self.iface.config.dns_max_ttl_ms));
                self.dns
                    .insert(name, addr, ttl_ms as u32, self.clock.now_ms());
                log::debug!("Resolved {} to {} (TTL {} s)", name, addr, ttl);
                Ok(addr)
            }
            Err(err) => {
                log::info!("Failed to resolve {}: {}", name, err);
                Err(err)
            }
        }
    }

    /// Sends `query` and runs the main loop until an answer arrives, retrying on timeout.
    fn dns_exchange(
        &mut self,
        server: SocketAddrV4,
        port: u16,
        query: &[u8],
    ) -> Result<(Ipv4Addr, u32), DnsError> {
        let timeout = self.iface.config.dns_timeout_ms;
        let attempts = self.iface.config.dns_max_retries.max(1);

        for attempt in 1..=attempts {
            let start = self.clock.now_ms();
            let mut sent = false;

            loop {
                if !sent {
                    match self.iface.udp_send_direct(port, server, query) {
                        Ok(()) => sent = true,
                        Err(err) => log::trace!("DNS query not sent yet: {}", err),
                    }
                }

                self.poll();

                if let Some(answer) = self.dns.take_answer() {
                    return answer;
                }
                if seq::elapsed(start, self.clock.now_ms()) >= timeout {
                    break;
                }
            }

            log::debug!("DNS query to {} timed out (attempt {})", server, attempt);
        }

        Err(DnsError::Timeout)
    }

    /// Starts (or restarts) the DHCP client. The current address is dropped until a lease is
    /// obtained.
    pub fn dhcp_start(&mut self) {
        let now = self.clock.now_ms();
        self.dhcp.start(&mut self.iface, now);
    }

    /// Returns the state of the DHCP client, or `None` if it was never started.
    pub fn dhcp_state(&self) -> Option<DhcpState> {
        self.dhcp.state()
    }

    /// Returns the counters of the ICMP echo responder.
    pub fn icmp_stats(&self) -> IcmpStats {
        self.iface.icmp_stats
    }
}

impl<L, C> fmt::Debug for NetStack<L, C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("NetStack")
            .field("config", &self.iface.config)
            .field("frames", &self.iface.frames)
            .field("tcp", &self.tcp)
            .field("udp", &self.udp)
            .field("dhcp", &self.dhcp)
            .finish()
    }
}
