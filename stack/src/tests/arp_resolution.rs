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

use super::harness::*;
use crate::UdpError;
use std::net::{Ipv4Addr, SocketAddrV4};

#[test]
fn answers_requests_for_local_address() {
    let mut h = Harness::new();
    h.inject(arp_frame(1, PEER_MAC, PEER_IP, [0; 6], LOCAL_IP));
    h.poll(1);

    let sent = h.sent_arp();
    assert_eq!(
        sent,
        vec![ArpOut {
            dst_mac: PEER_MAC,
            op: 2,
            sender_mac: LOCAL_MAC,
            sender_ip: LOCAL_IP,
            target_mac: PEER_MAC,
            target_ip: PEER_IP,
        }]
    );
}

#[test]
fn ignores_requests_for_other_addresses() {
    let mut h = Harness::new();
    h.inject(arp_frame(
        1,
        PEER_MAC,
        PEER_IP,
        [0; 6],
        Ipv4Addr::new(192, 168, 0, 200),
    ));
    h.poll(1);
    assert!(h.sent().is_empty());
}

#[test]
fn malformed_frames_ignored() {
    let mut h = Harness::new();
    let mut frame = arp_frame(1, PEER_MAC, PEER_IP, [0; 6], LOCAL_IP);
    // Hardware address length.
    frame[18] = 8;
    h.inject(frame);
    let mut frame = arp_frame(1, PEER_MAC, PEER_IP, [0; 6], LOCAL_IP);
    frame.truncate(30);
    h.inject(frame);
    h.poll(2);
    assert!(h.sent().is_empty());
}

#[test]
fn miss_sends_one_request_then_succeeds() {
    let stranger_ip = Ipv4Addr::new(192, 168, 0, 77);
    let stranger_mac = [0x02, 0, 0, 0, 0, 0x77];

    let mut h = Harness::new();
    let socket = h.stack.udp_open(5000).unwrap();
    let dst = SocketAddrV4::new(stranger_ip, 7);

    assert_eq!(
        h.stack.udp_send(socket, *dst.ip(), dst.port(), b"hello"),
        Err(UdpError::AddressPending)
    );
    assert_eq!(
        h.stack.udp_send(socket, *dst.ip(), dst.port(), b"hello"),
        Err(UdpError::AddressPending)
    );

    let requests = h.sent_arp();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].op, 1);
    assert_eq!(requests[0].dst_mac, [0xff; 6]);
    assert_eq!(requests[0].sender_ip, LOCAL_IP);
    assert_eq!(requests[0].target_ip, stranger_ip);

    h.inject(arp_frame(2, stranger_mac, stranger_ip, LOCAL_MAC, LOCAL_IP));
    h.poll(1);

    h.stack
        .udp_send(socket, *dst.ip(), dst.port(), b"hello")
        .unwrap();
    let sent = h.sent_udp();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].dst_mac, stranger_mac);
    assert_eq!(sent[0].dst, dst);
    assert_eq!(sent[0].src, local(5000));
    assert_eq!(sent[0].payload, b"hello");
}

#[test]
fn off_subnet_goes_through_gateway() {
    let mut h = Harness::new();
    let socket = h.stack.udp_open(5000).unwrap();
    let remote = Ipv4Addr::new(203, 0, 113, 9);

    assert_eq!(
        h.stack.udp_send(socket, remote, 53, b"x"),
        Err(UdpError::AddressPending)
    );
    let requests = h.sent_arp();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].target_ip, GATEWAY_IP);

    // The test link answers for the gateway.
    h.poll(1);
    h.stack.udp_send(socket, remote, 53, b"x").unwrap();
    let sent = h.sent_udp();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].dst_mac, GATEWAY_MAC);
    assert_eq!(*sent[0].dst.ip(), remote);
}

#[test]
fn learns_from_local_ip_traffic_only() {
    let mut h = Harness::new();
    let socket = h.stack.udp_open(5000).unwrap();

    h.inject(udp_frame(PEER_MAC, peer(9000), local(5000), b"ping"));
    h.poll(1);
    h.stack.udp_send(socket, PEER_IP, 9000, b"pong").unwrap();
    assert!(h.sent_arp().is_empty());

    // A datagram relayed by the router must not associate the remote address with the
    // router's MAC address.
    let remote = Ipv4Addr::new(203, 0, 113, 9);
    h.inject(udp_frame(
        GATEWAY_MAC,
        SocketAddrV4::new(remote, 9000),
        local(5000),
        b"ping",
    ));
    h.poll(1);
    let mut buf = [0; 16];
    assert_eq!(
        h.stack.udp_receive(socket, &mut buf).unwrap(),
        Some((4, SocketAddrV4::new(remote, 9000)))
    );
    assert!(h.stack.udp_send(socket, remote, 9000, b"pong").is_err());
    let requests = h.sent_arp();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].target_ip, GATEWAY_IP);
}
