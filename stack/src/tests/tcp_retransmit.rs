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
use crate::{Config, TcpState};

/// Advances the clock and polls every connection once.
fn wait(h: &mut Harness, ms: u32) {
    h.clock.advance(ms);
    h.poll(4);
}

#[test]
fn resends_identical_bytes_after_timeout() {
    let mut h = Harness::new();
    let (handle, snd_next) = establish_passive(&mut h, 80, peer(40000), 1000);
    h.sent();

    assert_eq!(h.stack.tcp_write(handle, b"payload"), Ok(7));
    let first = h.sent_tcp();
    assert_eq!(first.len(), 1);

    wait(&mut h, 999);
    assert!(h.sent().is_empty());

    wait(&mut h, 1);
    let again = h.sent_tcp();
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].seq, snd_next);
    assert_eq!(again[0].payload, first[0].payload);

    // Once acknowledged, nothing is sent anymore.
    h.inject(tcp_frame(
        peer(40000),
        local(80),
        1001,
        snd_next.wrapping_add(7),
        ACK,
        8192,
        &[],
    ));
    h.settle();
    wait(&mut h, 5000);
    assert!(h.sent().is_empty());
    assert_eq!(h.stack.tcp_state(handle), TcpState::Established);
}

#[test]
fn resumes_from_first_unacknowledged_byte() {
    let mut h = Harness::new();
    let (handle, local_addr, snd_next) =
        establish_active(&mut h, peer(80), 5000, 8192, Some(536));
    h.sent();

    let data: Vec<u8> = (0..1000u32).map(|n| (n % 251) as u8).collect();
    assert_eq!(h.stack.tcp_write(handle, &data), Ok(1000));
    h.settle();
    assert_eq!(h.sent_tcp().len(), 2);

    wait(&mut h, 500);
    h.inject(tcp_frame(
        peer(80),
        local_addr,
        5001,
        snd_next.wrapping_add(536),
        ACK,
        8192,
        &[],
    ));
    h.settle();
    assert!(h.sent().is_empty());

    // The timer restarted with the acknowledgement.
    wait(&mut h, 999);
    assert!(h.sent().is_empty());
    wait(&mut h, 1);
    let sent = h.sent_tcp();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].seq, snd_next.wrapping_add(536));
    assert_eq!(&sent[0].payload[..], &data[536..]);
}

#[test]
fn aborts_after_retry_bound() {
    let mut h = Harness::with_config(Config {
        tcp_max_retransmits: 3,
        ..Config::default()
    });
    let (handle, _) = establish_passive(&mut h, 80, peer(40000), 1000);
    h.sent();
    h.stack.tcp_write(handle, b"x").unwrap();
    h.sent();

    for _ in 0..3 {
        wait(&mut h, 1000);
        assert_eq!(h.sent_tcp().len(), 1);
        assert_eq!(h.stack.tcp_state(handle), TcpState::Established);
    }

    wait(&mut h, 1000);
    assert!(h.sent_tcp().is_empty());
    assert_eq!(h.stack.tcp_state(handle), TcpState::Closed);
}

#[test]
fn aborts_when_peer_silent_too_long() {
    let mut h = Harness::with_config(Config {
        tcp_max_retransmits: 100,
        tcp_give_up_ms: 5000,
        ..Config::default()
    });
    let (handle, _) = establish_passive(&mut h, 80, peer(40000), 1000);
    h.stack.tcp_write(handle, b"x").unwrap();

    for _ in 0..4 {
        wait(&mut h, 1000);
        assert_eq!(h.stack.tcp_state(handle), TcpState::Established);
    }
    wait(&mut h, 1000);
    assert_eq!(h.stack.tcp_state(handle), TcpState::Closed);
}

#[test]
fn syn_timeout_is_tripled() {
    let mut h = Harness::new();
    let handle = h.stack.tcp_connect(PEER_IP, 80).unwrap();
    h.settle();
    let syn = h.sent_tcp().into_iter().find(|s| s.has(SYN)).unwrap();

    wait(&mut h, 2999);
    assert!(h.sent().is_empty());
    wait(&mut h, 1);
    let again = h.sent_tcp();
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].flags, SYN);
    assert_eq!(again[0].seq, syn.seq);
    assert_eq!(h.stack.tcp_state(handle), TcpState::SynSent);
}

#[test]
fn handshake_gives_up() {
    let mut h = Harness::with_config(Config {
        tcp_give_up_ms: 10_000,
        ..Config::default()
    });
    let handle = h.stack.tcp_connect(PEER_IP, 80).unwrap();
    h.settle();
    wait(&mut h, 9_999);
    assert_eq!(h.stack.tcp_state(handle), TcpState::SynSent);
    wait(&mut h, 1);
    assert_eq!(h.stack.tcp_state(handle), TcpState::Closed);
}

#[test]
fn zero_window_probing() {
    let mut h = Harness::with_config(Config {
        tcp_max_retransmits: 2,
        ..Config::default()
    });
    let (handle, local_addr, snd_next) = establish_active(&mut h, peer(80), 5000, 0, None);
    h.sent();

    assert_eq!(h.stack.tcp_write(handle, b"abc"), Ok(3));
    let probe = h.sent_tcp();
    assert_eq!(probe.len(), 1);
    assert_eq!(probe[0].seq, snd_next);
    assert_eq!(probe[0].payload, b"a");

    // Probes are repeated without counting as retransmissions, as long as the peer answers.
    for _ in 0..4 {
        wait(&mut h, 1000);
        let sent = h.sent_tcp();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].seq, snd_next);
        assert_eq!(sent[0].payload, b"a");
        h.inject(tcp_frame(peer(80), local_addr, 5001, snd_next, ACK, 0, &[]));
        h.settle();
    }
    assert_eq!(h.stack.tcp_state(handle), TcpState::Established);

    h.inject(tcp_frame(peer(80), local_addr, 5001, snd_next, ACK, 100, &[]));
    h.settle();
    let sent = h.sent_tcp();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].seq, snd_next.wrapping_add(1));
    assert_eq!(sent[0].payload, b"bc");
}

#[test]
fn receive_window_closes_and_reopens() {
    let mut h = Harness::with_config(Config {
        tcp_buffer_size: 1000,
        ..Config::default()
    });
    let (handle, snd_next) = establish_passive(&mut h, 80, peer(40000), 1000);
    h.sent();

    // The peer's MSS is 536, so the window closes once less than 500 bytes are free.
    h.inject(tcp_frame(
        peer(40000),
        local(80),
        1001,
        snd_next,
        ACK,
        8192,
        &[7; 600],
    ));
    h.settle();
    let acks = h.sent_tcp();
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].ack, 1601);
    assert_eq!(acks[0].window, 0);

    let mut buf = [0; 50];
    assert_eq!(h.stack.tcp_read(handle, &mut buf), Ok(50));
    h.poll(4);
    assert!(h.sent().is_empty());

    let mut buf = [0; 600];
    assert_eq!(h.stack.tcp_read(handle, &mut buf), Ok(550));
    h.poll(4);
    let update = h.sent_tcp();
    assert_eq!(update.len(), 1);
    assert_eq!(update[0].ack, 1601);
    assert_eq!(update[0].window, 1000);
}
