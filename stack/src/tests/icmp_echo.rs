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
use crate::IcmpStats;
use std::net::{Ipv4Addr, SocketAddrV4};

#[test]
fn echo_request_answered() {
    let mut h = Harness::new();
    h.inject(icmp_echo_request(PEER_IP, LOCAL_IP, 0x1234, 7, b"abcdefghi"));
    h.poll(1);

    let sent = h.sent_icmp();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].src, LOCAL_IP);
    assert_eq!(sent[0].dst, PEER_IP);
    assert_eq!((sent[0].ty, sent[0].code), (0, 0));
    assert_eq!(&sent[0].rest[..4], &[0x12, 0x34, 0, 7]);
    assert_eq!(&sent[0].rest[4..], b"abcdefghi");

    assert_eq!(
        h.stack.icmp_stats(),
        IcmpStats {
            echo_requests: 1,
            echo_replies: 1,
            echo_reply_failures: 0,
        }
    );
}

#[test]
fn corrupted_request_ignored() {
    let mut h = Harness::new();
    let mut frame = icmp_echo_request(PEER_IP, LOCAL_IP, 1, 1, b"data");
    let last = frame.len() - 1;
    frame[last] ^= 0xff;
    h.inject(frame);
    h.poll(1);

    assert!(h.sent().is_empty());
    assert_eq!(h.stack.icmp_stats(), IcmpStats::default());
}

#[test]
fn unresolved_sender_counts_as_failure() {
    let mut h = Harness::new();
    let mut frame = icmp_echo_request(Ipv4Addr::new(203, 0, 113, 9), LOCAL_IP, 1, 1, b"data");
    frame[6..12].copy_from_slice(&GATEWAY_MAC);
    h.inject(frame);
    h.poll(1);

    assert!(h.sent_icmp().is_empty());
    assert_eq!(
        h.stack.icmp_stats(),
        IcmpStats {
            echo_requests: 1,
            echo_replies: 0,
            echo_reply_failures: 1,
        }
    );
}

#[test]
fn port_unreachable_quotes_datagram() {
    let mut h = Harness::new();
    let frame = udp_frame(PEER_MAC, peer(9000), local(4444), b"0123456789");
    let original_ip = frame[14..14 + 28].to_vec();
    h.inject(frame);
    h.poll(1);

    let sent = h.sent_icmp();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].dst, PEER_IP);
    assert_eq!((sent[0].ty, sent[0].code), (3, 3));
    assert_eq!(&sent[0].rest[..4], &[0; 4]);
    assert_eq!(&sent[0].rest[4..], &original_ip[..]);
}

#[test]
fn no_unreachable_for_broadcasts() {
    let mut h = Harness::new();
    h.inject(udp_frame(
        PEER_MAC,
        peer(9000),
        SocketAddrV4::new(Ipv4Addr::BROADCAST, 4444),
        b"anyone",
    ));
    h.inject(udp_frame(
        PEER_MAC,
        peer(9000),
        SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, 255), 4444),
        b"anyone",
    ));
    h.poll(2);
    assert!(h.sent().is_empty());
}

#[test]
fn datagrams_for_other_hosts_dropped() {
    let mut h = Harness::new();
    h.inject(icmp_echo_request(
        PEER_IP,
        Ipv4Addr::new(192, 168, 0, 99),
        1,
        1,
        b"data",
    ));
    let mut fragment = icmp_echo_request(PEER_IP, LOCAL_IP, 1, 1, b"data");
    // More fragments.
    fragment[14 + 6] = 0x20;
    h.inject(fragment);
    h.poll(2);

    assert!(h.sent().is_empty());
    assert_eq!(h.stack.icmp_stats().echo_requests, 0);
}
