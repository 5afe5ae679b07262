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

//! User Datagram Protocol.
//!
//! A UDP socket is bound to a local port and holds at most one received datagram. A datagram
//! received while the previous one hasn't been read replaces it.

use crate::checksum;
use crate::frame::Frame;
use crate::interface::Interface;
use crate::ip::{Datagram, IP_PAYLOAD_OFFSET, MAX_IP_PAYLOAD, PROTO_UDP};
use crate::link::LinkDevice;
use crate::port_assign::PortAssign;
use std::net::{Ipv4Addr, SocketAddrV4};

/// Length of the UDP header.
pub(crate) const UDP_HEADER_LEN: usize = 8;

/// Offset of the UDP payload within a frame we send.
pub(crate) const UDP_PAYLOAD_OFFSET: usize = IP_PAYLOAD_OFFSET + UDP_HEADER_LEN;

/// Largest payload of a datagram, sent or received.
pub const MAX_UDP_PAYLOAD: usize = MAX_IP_PAYLOAD - UDP_HEADER_LEN;

/// Identifies a bound UDP socket of a [`NetStack`](crate::NetStack).
///
/// A handle becomes stale when its socket is closed. Stale handles are rejected by every
/// operation, even if the socket slot has been reused since.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UdpHandle {
    slot: usize,
    generation: u32,
}

/// Error that can happen on a UDP socket operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UdpError {
    /// Another socket is already bound to this port.
    #[error("Port {0} is already bound")]
    PortInUse(u16),
    /// All the sockets are in use.
    #[error("No free UDP socket")]
    PoolFull,
    /// Couldn't find a free port in the ephemeral range.
    #[error("No ephemeral port available")]
    NoEphemeralPort,
    /// The handle refers to a socket that has been closed.
    #[error("Invalid or closed UDP handle")]
    InvalidHandle,
    /// The payload doesn't fit in a single Ethernet frame.
    #[error("Payload of {0} bytes exceeds the maximum datagram size")]
    PayloadTooLarge(usize),
    /// The link-layer address of the next hop isn't known yet. A request has been sent, and
    /// sending again later is expected to succeed.
    #[error("Address resolution in progress")]
    AddressPending,
    /// The frame pool is exhausted.
    #[error("No frame available")]
    NoFrame,
}

/// Header of a received UDP datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct UdpDatagram {
    pub(crate) src_port: u16,
    pub(crate) dst_port: u16,
    pub(crate) payload_offset: usize,
    pub(crate) payload_len: usize,
}

impl UdpDatagram {
    pub(crate) fn payload<'a>(&self, frame: &'a Frame) -> &'a [u8] {
        &frame.buffer()[self.payload_offset..self.payload_offset + self.payload_len]
    }
}

/// Validates the UDP header within `datagram`.
///
/// The checksum is only verified if the sender computed one.
pub(crate) fn parse(frame: &Frame, datagram: &Datagram) -> Option<UdpDatagram> {
    let segment = datagram.payload(frame);
    if segment.len() < UDP_HEADER_LEN {
        log::trace!("Dropping runt UDP datagram");
        return None;
    }

    let offset = datagram.payload_offset;
    let length = usize::from(frame.read_u16(offset + 4));
    if length < UDP_HEADER_LEN || length > segment.len() {
        log::trace!("Dropping UDP datagram with bad length");
        return None;
    }

    if frame.read_u16(offset + 6) != 0
        && checksum::transport(datagram.src, datagram.dst, PROTO_UDP, &segment[..length]) != 0
    {
        log::trace!("Dropping UDP datagram with bad checksum");
        return None;
    }

    Some(UdpDatagram {
        src_port: frame.read_u16(offset),
        dst_port: frame.read_u16(offset + 2),
        payload_offset: offset + UDP_HEADER_LEN,
        payload_len: length - UDP_HEADER_LEN,
    })
}

/// Table of the bound UDP sockets.
#[derive(Debug)]
pub(crate) struct UdpSockets {
    sockets: Vec<Socket>,
    ports: PortAssign,
    next_generation: u32,
}

#[derive(Debug)]
struct Socket {
    /// `None` if the slot is free.
    port: Option<u16>,
    generation: u32,
    /// Last received payload, if not read yet.
    pending: Option<Received>,
}

#[derive(Debug)]
struct Received {
    data: Vec<u8>,
    from: SocketAddrV4,
}

impl UdpSockets {
    pub(crate) fn new(count: usize, seed: u64) -> Self {
        UdpSockets {
            sockets: (0..count)
                .map(|_| Socket {
                    port: None,
                    generation: 0,
                    pending: None,
                })
                .collect(),
            ports: PortAssign::new(seed),
            next_generation: 1,
        }
    }

    /// Binds a socket to `port`.
    pub(crate) fn open(&mut self, port: u16) -> Result<UdpHandle, UdpError> {
        if self.ports.is_reserved(port) {
            return Err(UdpError::PortInUse(port));
        }
        let slot = self
            .sockets
            .iter()
            .position(|s| s.port.is_none())
            .ok_or(UdpError::PoolFull)?;
        self.ports
            .reserve(port)
            .map_err(|err| UdpError::PortInUse(err.0))?;

        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1);
        let socket = &mut self.sockets[slot];
        socket.port = Some(port);
        socket.generation = generation;
        socket.pending = None;
        Ok(UdpHandle { slot, generation })
    }

    /// Binds a socket to a random port of the ephemeral range.
    pub(crate) fn open_ephemeral(&mut self) -> Result<UdpHandle, UdpError> {
        if self.sockets.iter().all(|s| s.port.is_some()) {
            return Err(UdpError::PoolFull);
        }
        let port = self.ports.reserve_any().ok_or(UdpError::NoEphemeralPort)?;
        self.ports.free(port);
        self.open(port)
    }

    /// Unbinds a socket. Returns false if the handle was stale.
    pub(crate) fn close(&mut self, handle: UdpHandle) -> bool {
        let port = match self.socket_mut(handle) {
            Some(socket) => {
                socket.pending = None;
                socket.port.take()
            }
            None => return false,
        };
        if let Some(port) = port {
            self.ports.free(port);
        }
        true
    }

    /// Returns the local port of a socket.
    pub(crate) fn port(&self, handle: UdpHandle) -> Option<u16> {
        self.socket(handle).and_then(|s| s.port)
    }

    /// Returns true if a datagram is waiting to be read.
    pub(crate) fn has_data(&self, handle: UdpHandle) -> Result<bool, UdpError> {
        let socket = self.socket(handle).ok_or(UdpError::InvalidHandle)?;
        Ok(socket.pending.is_some())
    }

    /// Moves the pending datagram into `buf`, truncating it if `buf` is too small.
    pub(crate) fn take(
        &mut self,
        handle: UdpHandle,
        buf: &mut [u8],
    ) -> Result<Option<(usize, SocketAddrV4)>, UdpError> {
        let socket = self.socket_mut(handle).ok_or(UdpError::InvalidHandle)?;
        Ok(socket.pending.take().map(|received| {
            let len = received.data.len().min(buf.len());
            buf[..len].copy_from_slice(&received.data[..len]);
            (len, received.from)
        }))
    }

    /// Stores a datagram in the socket bound to `port`. Returns false if no socket is bound to
    /// this port.
    pub(crate) fn deliver(&mut self, port: u16, from: SocketAddrV4, payload: &[u8]) -> bool {
        let socket = match self.sockets.iter_mut().find(|s| s.port == Some(port)) {
            Some(s) => s,
            None => return false,
        };

        if let Some(previous) = &socket.pending {
            log::trace!("UDP port {}: overwriting datagram from {}", port, previous.from);
        }

        let len = payload.len().min(MAX_UDP_PAYLOAD);
        let received = socket.pending.get_or_insert_with(|| Received {
            data: Vec::with_capacity(len),
            from,
        });
        received.data.clear();
        received.data.extend_from_slice(&payload[..len]);
        received.from = from;
        true
    }

    /// Reserves a random port of the ephemeral range without binding a socket to it.
    pub(crate) fn reserve_ephemeral(&mut self) -> Option<u16> {
        self.ports.reserve_any()
    }

    /// Releases a port obtained from [`UdpSockets::reserve_ephemeral`].
    pub(crate) fn release_port(&mut self, port: u16) {
        self.ports.free(port);
    }

    fn socket(&self, handle: UdpHandle) -> Option<&Socket> {
        self.sockets
            .get(handle.slot)
            .filter(|s| s.port.is_some() && s.generation == handle.generation)
    }

    fn socket_mut(&mut self, handle: UdpHandle) -> Option<&mut Socket> {
        self.sockets
            .get_mut(handle.slot)
            .filter(|s| s.port.is_some() && s.generation == handle.generation)
    }
}

impl<L: LinkDevice> Interface<L> {
    /// Sends a datagram from the local address.
    pub(crate) fn udp_send_direct(
        &mut self,
        src_port: u16,
        dst: SocketAddrV4,
        payload: &[u8],
    ) -> Result<(), UdpError> {
        let mut frame = self.udp_build(self.local_ip(), src_port, dst, payload)?;
        let sent = self.ip_send(
            &mut frame,
            u32::from(*dst.ip()),
            PROTO_UDP,
            UDP_HEADER_LEN + payload.len(),
        );
        self.frames.free(frame);
        if sent {
            Ok(())
        } else {
            Err(UdpError::AddressPending)
        }
    }

    /// Sends a datagram to 255.255.255.255 with `src` as source address.
    pub(crate) fn udp_send_broadcast(
        &mut self,
        src: u32,
        src_port: u16,
        dst_port: u16,
        payload: &[u8],
    ) -> Result<(), UdpError> {
        let dst = SocketAddrV4::new(Ipv4Addr::BROADCAST, dst_port);
        let mut frame = self.udp_build(src, src_port, dst, payload)?;
        self.ip_send_broadcast(&mut frame, src, PROTO_UDP, UDP_HEADER_LEN + payload.len());
        self.frames.free(frame);
        Ok(())
    }

    fn udp_build(
        &mut self,
        src: u32,
        src_port: u16,
        dst: SocketAddrV4,
        payload: &[u8],
    ) -> Result<Frame, UdpError> {
        if payload.len() > MAX_UDP_PAYLOAD {
            return Err(UdpError::PayloadTooLarge(payload.len()));
        }

        let mut frame = self.frames.alloc().ok_or(UdpError::NoFrame)?;
        let len = UDP_HEADER_LEN + payload.len();
        frame.write_u16(IP_PAYLOAD_OFFSET, src_port);
        frame.write_u16(IP_PAYLOAD_OFFSET + 2, dst.port());
        frame.write_u16(IP_PAYLOAD_OFFSET + 4, len as u16);
        frame.write_u16(IP_PAYLOAD_OFFSET + 6, 0);
        frame.copy_from(UDP_PAYLOAD_OFFSET, payload);

        let sum = checksum::transport(
            src,
            u32::from(*dst.ip()),
            PROTO_UDP,
            &frame.buffer()[IP_PAYLOAD_OFFSET..IP_PAYLOAD_OFFSET + len],
        );
        // Zero means "no checksum".
        frame.write_u16(IP_PAYLOAD_OFFSET + 6, if sum == 0 { 0xffff } else { sum });
        Ok(frame)
    }
}
