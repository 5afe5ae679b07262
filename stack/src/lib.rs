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

//! Cooperative single-threaded TCP/IP stack.
//!
//! The stack is an in-memory protocol engine operating on Ethernet frames. It implements ARP,
//! IPv4, ICMP, UDP, TCP, plus DHCP and DNS clients on top of them.
//!
//! Everything is owned by a single [`NetStack`] value. The host provides a [`LinkDevice`] that
//! moves frames to and from the wire, and a [`Clock`] giving a millisecond counter. The host is
//! then expected to call [`NetStack::poll`] periodically. Each call processes at most one
//! received frame, advances one TCP connection, and ticks the timers.
//!
//! > **Note**: Nothing in this crate blocks, except for [`NetStack::dns_resolve`] which polls
//! >           the stack in a loop until an answer arrives or a timeout elapses.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod checksum;
pub mod clock;
pub mod config;
pub mod dhcp;
pub mod dns;
pub mod frame;
pub mod link;
pub mod seq;
pub mod tcp;
pub mod udp;

mod arp;
mod icmp;
mod interface;
mod ip;
mod port_assign;
mod stack;

pub use self::clock::Clock;
pub use self::config::Config;
pub use self::dhcp::DhcpState;
pub use self::dns::DnsError;
pub use self::frame::{Frame, FramePool};
pub use self::icmp::IcmpStats;
pub use self::link::LinkDevice;
pub use self::stack::NetStack;
pub use self::tcp::{TcpError, TcpHandle, TcpListener, TcpState};
pub use self::udp::{UdpError, UdpHandle};
