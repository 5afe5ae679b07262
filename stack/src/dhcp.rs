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

//! DHCP client (RFC 2131).
//!
//! The client acquires a lease, applies it to the [`Config`](crate::Config) of the stack, and
//! renews it when the renewal time is reached. Timers are checked by the main loop.
//!
//! ```text
//! INIT -> SELECTING -> REQUESTING -> BOUND -> RENEWING -> REBINDING
//!   ^          |             |                    |            |
//!   +----------+-------------+--------------------+------------+  (timeout or NAK)
//! ```

use crate::interface::Interface;
use crate::link::LinkDevice;
use crate::seq;
use std::net::{Ipv4Addr, SocketAddrV4};

/// UDP port of the client.
pub const CLIENT_PORT: u16 = 68;
/// UDP port of the server.
pub const SERVER_PORT: u16 = 67;

const OP_REQUEST: u8 = 1;
const OP_REPLY: u8 = 2;
const HTYPE_ETHERNET: u8 = 1;
const FLAG_BROADCAST: u16 = 0x8000;
const MAGIC_COOKIE: u32 = 0x6382_5363;
const INITIAL_XID: u32 = 0x4a4f_5001;

/// Length of the fixed part of a message, up to the magic cookie.
const FIXED_LEN: usize = 236;
/// Messages are padded to this length (BOOTP minimum).
const MIN_MESSAGE_LEN: usize = 300;

const OPT_PAD: u8 = 0;
const OPT_SUBNET_MASK: u8 = 1;
const OPT_ROUTER: u8 = 3;
const OPT_DNS: u8 = 6;
const OPT_REQUESTED_IP: u8 = 50;
const OPT_LEASE_TIME: u8 = 51;
const OPT_MESSAGE_TYPE: u8 = 53;
const OPT_SERVER_ID: u8 = 54;
const OPT_PARAMETERS: u8 = 55;
const OPT_RENEWAL_TIME: u8 = 58;
const OPT_REBINDING_TIME: u8 = 59;
const OPT_END: u8 = 255;

const DHCPDISCOVER: u8 = 1;
const DHCPOFFER: u8 = 2;
const DHCPREQUEST: u8 = 3;
const DHCPACK: u8 = 5;
const DHCPNAK: u8 = 6;

/// Lease times above this value are treated as this value, so that timers can be compared
/// with wrapping arithmetic.
const MAX_LEASE_MS: u64 = 0x7fff_ffff;

/// State of the DHCP client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DhcpState {
    /// About to broadcast a discover.
    Init,
    /// Discover sent, waiting for an offer.
    Selecting,
    /// Offer received, request sent, waiting for the acknowledgement.
    Requesting,
    /// Lease acquired.
    Bound,
    /// Renewal time reached, request unicast to the server.
    Renewing,
    /// Rebinding time reached, request broadcast to any server.
    Rebinding,
}

/// Fields of a message received from a server.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Reply {
    message_type: u8,
    your_ip: u32,
    server_ip: u32,
    server_id: Option<u32>,
    subnet_mask: Option<u32>,
    router: Option<u32>,
    dns: Option<u32>,
    lease_secs: Option<u32>,
    renewal_secs: Option<u32>,
    rebinding_secs: Option<u32>,
}

#[derive(Debug)]
pub(crate) struct DhcpClient {
    running: bool,
    state: DhcpState,
    xid: u32,
    /// Address offered by the selected server.
    offered: u32,
    server: u32,
    last_send: u32,
    retries: u32,
    lease_start: u32,
    /// `None` for an infinite lease.
    lease_ms: Option<u32>,
    t1_ms: u32,
    t2_ms: u32,
}

impl DhcpClient {
    pub(crate) fn new() -> Self {
        DhcpClient {
            running: false,
            state: DhcpState::Init,
            xid: INITIAL_XID,
            offered: 0,
            server: 0,
            last_send: 0,
            retries: 0,
            lease_start: 0,
            lease_ms: None,
            t1_ms: 0,
            t2_ms: 0,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running
    }

    pub(crate) fn state(&self) -> Option<DhcpState> {
        if self.running {
            Some(self.state)
        } else {
            None
        }
    }

    /// Starts negotiating a new lease. The current address is dropped.
    pub(crate) fn start<L: LinkDevice>(&mut self, iface: &mut Interface<L>, now: u32) {
        log::info!("DHCP client started");
        self.running = true;
        iface.config.ip = Ipv4Addr::UNSPECIFIED;
        self.restart(iface, now);
    }

    fn restart<L: LinkDevice>(&mut self, iface: &mut Interface<L>, now: u32) {
        self.xid = self.xid.wrapping_add(1);
        self.offered = 0;
        self.server = 0;
        self.retries = 0;
        self.set_state(iface, DhcpState::Init);
        self.send_discover(iface, now);
    }

    fn set_state<L: LinkDevice>(&mut self, iface: &mut Interface<L>, state: DhcpState) {
        if self.state != state {
            log::debug!("DHCP {:?} -> {:?}", self.state, state);
            self.state = state;
        }
        iface.dhcp_active = self.running && state != DhcpState::Bound;
        iface.dhcp_offered = self.offered;
    }

    /// Checks the timers.
    pub(crate) fn poll<L: LinkDevice>(&mut self, iface: &mut Interface<L>, now: u32) {
        if !self.running {
            return;
        }

        let retry_due = seq::elapsed(self.last_send, now) >= iface.config.dhcp_retry_ms;
        let in_lease = seq::elapsed(self.lease_start, now);

        match self.state {
            DhcpState::Init => self.send_discover(iface, now),
            DhcpState::Selecting | DhcpState::Requesting if retry_due => {
                if self.retries >= iface.config.dhcp_max_retries {
                    log::debug!("DHCP no answer in {:?}, restarting", self.state);
                    self.restart(iface, now);
                } else {
                    self.retries += 1;
                    if self.state == DhcpState::Selecting {
                        self.send_discover(iface, now);
                    } else {
                        self.send_request(iface, now);
                    }
                }
            }
            DhcpState::Selecting | DhcpState::Requesting => {}
            DhcpState::Bound => {
                if self.lease_ms.is_some() && in_lease >= self.t1_ms {
                    self.set_state(iface, DhcpState::Renewing);
                    self.send_request(iface, now);
                }
            }
            DhcpState::Renewing => {
                if in_lease >= self.t2_ms {
                    self.set_state(iface, DhcpState::Rebinding);
                    self.send_request(iface, now);
                } else if retry_due {
                    self.send_request(iface, now);
                }
            }
            DhcpState::Rebinding => {
                if self.lease_ms.map_or(false, |lease| in_lease >= lease) {
                    log::info!("DHCP lease on {} expired", iface.config.ip);
                    iface.config.ip = Ipv4Addr::UNSPECIFIED;
                    self.restart(iface, now);
                } else if retry_due {
                    self.send_request(iface, now);
                }
            }
        }
    }

    /// Processes a message received on the client port.
    pub(crate) fn receive<L: LinkDevice>(
        &mut self,
        iface: &mut Interface<L>,
        message: &[u8],
        now: u32,
    ) {
        let reply = match parse(message, self.xid, &iface.config.mac_address) {
            Some(r) => r,
            None => return,
        };

        match (self.state, reply.message_type) {
            (DhcpState::Selecting, DHCPOFFER) => {
                if reply.your_ip == 0 {
                    return;
                }
                self.offered = reply.your_ip;
                self.server = reply.server_id.unwrap_or(reply.server_ip);
                log::debug!(
                    "DHCP offer of {} from {}",
                    Ipv4Addr::from(self.offered),
                    Ipv4Addr::from(self.server)
                );
                self.retries = 0;
                self.set_state(iface, DhcpState::Requesting);
                self.send_request(iface, now);
            }
            (DhcpState::Requesting, DHCPACK)
            | (DhcpState::Renewing, DHCPACK)
            | (DhcpState::Rebinding, DHCPACK) => {
                if reply.your_ip == 0 {
                    return;
                }
                self.bind(iface, &reply, now);
            }
            (DhcpState::Requesting, DHCPNAK)
            | (DhcpState::Renewing, DHCPNAK)
            | (DhcpState::Rebinding, DHCPNAK) => {
                log::info!("DHCP request rejected by server");
                iface.config.ip = Ipv4Addr::UNSPECIFIED;
                self.restart(iface, now);
            }
            (state, ty) => log::trace!("DHCP ignoring message type {} in {:?}", ty, state),
        }
    }

    fn bind<L: LinkDevice>(&mut self, iface: &mut Interface<L>, reply: &Reply, now: u32) {
        self.offered = reply.your_ip;
        if let Some(server) = reply.server_id {
            self.server = server;
        } else if self.server == 0 {
            self.server = reply.server_ip;
        }

        iface.config.ip = Ipv4Addr::from(reply.your_ip);
        if let Some(mask) = reply.subnet_mask {
            iface.config.netmask = Ipv4Addr::from(mask);
        }
        if let Some(router) = reply.router {
            iface.config.gateway = Ipv4Addr::from(router);
        }
        if let Some(dns) = reply.dns {
            iface.config.dns_server = Ipv4Addr::from(dns);
        }

        self.lease_start = now;
        self.lease_ms = match reply.lease_secs {
            None | Some(0) | Some(0xffff_ffff) => None,
            Some(secs) => Some(secs_to_ms(secs)),
        };
        if let Some(lease) = self.lease_ms {
            let fraction = |permille: u32| (u64::from(lease) * u64::from(permille) / 1000) as u32;
            self.t1_ms = reply
                .renewal_secs
                .map(secs_to_ms)
                .unwrap_or_else(|| fraction(iface.config.dhcp_t1_permille));
            self.t2_ms = reply
                .rebinding_secs
                .map(secs_to_ms)
                .unwrap_or_else(|| fraction(iface.config.dhcp_t2_permille));
        }

        log::info!(
            "DHCP bound to {}/{} via {} (lease: {:?} ms)",
            iface.config.ip,
            iface.config.netmask,
            iface.config.gateway,
            self.lease_ms
        );

        self.retries = 0;
        self.set_state(iface, DhcpState::Bound);
        iface.send_gratuitous_arp();
    }

    fn send_discover<L: LinkDevice>(&mut self, iface: &mut Interface<L>, now: u32) {
        self.last_send = now;
        let message = self.build(iface, DHCPDISCOVER);
        if iface
            .udp_send_broadcast(0, CLIENT_PORT, SERVER_PORT, &message)
            .is_ok()
        {
            self.set_state(iface, DhcpState::Selecting);
        }
    }

    fn send_request<L: LinkDevice>(&mut self, iface: &mut Interface<L>, now: u32) {
        self.last_send = now;
        let message = self.build(iface, DHCPREQUEST);
        let result = match self.state {
            DhcpState::Renewing => iface.udp_send_direct(
                CLIENT_PORT,
                SocketAddrV4::new(Ipv4Addr::from(self.server), SERVER_PORT),
                &message,
            ),
            DhcpState::Rebinding => {
                let src = iface.local_ip();
                iface.udp_send_broadcast(src, CLIENT_PORT, SERVER_PORT, &message)
            }
            _ => iface.udp_send_broadcast(0, CLIENT_PORT, SERVER_PORT, &message),
        };
        if let Err(err) = result {
            log::trace!("DHCP request not sent: {}", err);
        }
    }

    fn build<L: LinkDevice>(&self, iface: &Interface<L>, message_type: u8) -> Vec<u8> {
        let mut msg = Vec::with_capacity(MIN_MESSAGE_LEN);
        let renewing = matches!(self.state, DhcpState::Renewing | DhcpState::Rebinding)
            && message_type == DHCPREQUEST;

        msg.push(OP_REQUEST);
        msg.push(HTYPE_ETHERNET);
        msg.push(6);
        msg.push(0);
        msg.extend_from_slice(&self.xid.to_be_bytes());
        msg.extend_from_slice(&0u16.to_be_bytes());
        let flags = if renewing { 0 } else { FLAG_BROADCAST };
        msg.extend_from_slice(&flags.to_be_bytes());
        let ciaddr = if renewing { iface.local_ip() } else { 0 };
        msg.extend_from_slice(&ciaddr.to_be_bytes());
        // yiaddr, siaddr, giaddr
        msg.extend_from_slice(&[0; 12]);
        msg.extend_from_slice(&iface.config.mac_address);
        msg.resize(FIXED_LEN, 0);

        msg.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
        msg.extend_from_slice(&[OPT_MESSAGE_TYPE, 1, message_type]);
        if message_type == DHCPREQUEST && !renewing {
            msg.extend_from_slice(&[OPT_REQUESTED_IP, 4]);
            msg.extend_from_slice(&self.offered.to_be_bytes());
            msg.extend_from_slice(&[OPT_SERVER_ID, 4]);
            msg.extend_from_slice(&self.server.to_be_bytes());
        }
        msg.extend_from_slice(&[
            OPT_PARAMETERS,
            6,
            OPT_SUBNET_MASK,
            OPT_ROUTER,
            OPT_DNS,
            OPT_LEASE_TIME,
            OPT_RENEWAL_TIME,
            OPT_REBINDING_TIME,
        ]);
        msg.push(OPT_END);

        if msg.len() < MIN_MESSAGE_LEN {
            msg.resize(MIN_MESSAGE_LEN, OPT_PAD);
        }
        msg
    }
}

fn secs_to_ms(secs: u32) -> u32 {
    (u64::from(secs) * 1000).min(MAX_LEASE_MS) as u32
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let b = bytes.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

/// Parses a message from a server. Returns `None` if the message is malformed or isn't a
/// reply to our transaction.
fn parse(message: &[u8], xid: u32, mac: &[u8; 6]) -> Option<Reply> {
    if message.len() < FIXED_LEN + 4
        || message[0] != OP_REPLY
        || read_u32(message, 4)? != xid
        || &message[28..34] != mac
        || read_u32(message, FIXED_LEN)? != MAGIC_COOKIE
    {
        return None;
    }

    let mut reply = Reply {
        your_ip: read_u32(message, 16)?,
        server_ip: read_u32(message, 20)?,
        ..Reply::default()
    };

    let mut options = &message[FIXED_LEN + 4..];
    while let Some(&code) = options.first() {
        match code {
            OPT_PAD => {
                options = &options[1..];
                continue;
            }
            OPT_END => break,
            _ => {}
        }

        let len = usize::from(*options.get(1)?);
        let value = options.get(2..2 + len)?;
        let as_u32 = read_u32(value, 0);
        match code {
            OPT_MESSAGE_TYPE => reply.message_type = *value.first()?,
            OPT_SUBNET_MASK => reply.subnet_mask = as_u32,
            OPT_ROUTER => reply.router = as_u32,
            OPT_DNS => reply.dns = as_u32,
            OPT_SERVER_ID => reply.server_id = as_u32,
            OPT_LEASE_TIME => reply.lease_secs = as_u32,
            OPT_RENEWAL_TIME => reply.renewal_secs = as_u32,
            OPT_REBINDING_TIME => reply.rebinding_secs = as_u32,
            _ => {}
        }
        options = &options[2 + len..];
    }

    if reply.message_type == 0 {
        return None;
    }
    Some(reply)
}
