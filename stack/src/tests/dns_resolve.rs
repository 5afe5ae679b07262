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
use crate::{Config, DnsError};
use std::cell::RefCell;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::rc::Rc;

const ADDRESS: [u8; 4] = [93, 184, 216, 34];

fn dns_harness(config: Config) -> Harness {
    let h = Harness::with_config(Config {
        dns_server: GATEWAY_IP,
        ..config
    });
    // The resolver blocks until an answer arrives or the timeout elapses.
    h.clock.set_step(1);
    h
}

/// Builds the answer to `query`: the question, followed by `answers` A records.
fn answer(query: &[u8], rcode: u8, ttl: u32, answers: usize) -> Vec<u8> {
    let mut msg = query.to_vec();
    msg[2] = 0x81;
    msg[3] = 0x80 | rcode;
    msg[7] = answers as u8;
    for _ in 0..answers {
        msg.extend_from_slice(&[0xc0, 12, 0, 1, 0, 1]);
        msg.extend_from_slice(&ttl.to_be_bytes());
        msg.extend_from_slice(&[0, 4]);
        msg.extend_from_slice(&ADDRESS);
    }
    msg
}

/// Installs a server on the gateway. Every query it receives is recorded.
fn serve(
    h: &Harness,
    mut reply: impl FnMut(&[u8]) -> Option<Vec<u8>> + 'static,
) -> Rc<RefCell<Vec<UdpOut>>> {
    let queries = Rc::new(RefCell::new(Vec::new()));
    let log = queries.clone();
    h.link.set_responder(move |datagram| {
        if datagram.dst.port() != 53 {
            return None;
        }
        log.borrow_mut().push(datagram.clone());
        let msg = reply(&datagram.payload)?;
        Some(udp_frame(GATEWAY_MAC, datagram.dst, datagram.src, &msg))
    });
    queries
}

#[test]
fn resolves_then_answers_from_cache() {
    let mut h = dns_harness(Config::default());
    let queries = serve(&h, |q| Some(answer(q, 0, 3600, 1)));

    assert_eq!(h.stack.dns_resolve("example.com"), Ok(Ipv4Addr::from(ADDRESS)));
    {
        let queries = queries.borrow();
        assert_eq!(queries.len(), 1);
        let query = &queries[0];
        assert_eq!(query.dst_mac, GATEWAY_MAC);
        assert_eq!(*query.dst.ip(), GATEWAY_IP);
        assert_eq!(*query.src.ip(), LOCAL_IP);
        assert!(query.src.port() >= 49152);
        assert_ne!(&query.payload[0..2], &[0, 0]);
        assert_eq!(&query.payload[2..4], &[0x01, 0x00]);
        assert_eq!(&query.payload[12..], b"\x07example\x03com\x00\x00\x01\x00\x01");
    }

    h.sent();
    assert_eq!(
        h.stack.dns_resolve("EXAMPLE.com."),
        Ok(Ipv4Addr::from(ADDRESS))
    );
    assert_eq!(queries.borrow().len(), 1);
    assert!(h.sent().is_empty());
}

#[test]
fn cache_entries_expire() {
    let mut h = dns_harness(Config::default());
    let queries = serve(&h, |q| Some(answer(q, 0, 2, 1)));

    assert!(h.stack.dns_resolve("example.com").is_ok());
    assert!(h.stack.dns_resolve("example.com").is_ok());
    assert_eq!(queries.borrow().len(), 1);

    h.clock.advance(2000);
    assert!(h.stack.dns_resolve("example.com").is_ok());
    assert_eq!(queries.borrow().len(), 2);

    // Each query uses a new identifier.
    let queries = queries.borrow();
    assert_ne!(&queries[0].payload[0..2], &queries[1].payload[0..2]);
}

#[test]
fn ttl_capped() {
    let mut h = dns_harness(Config {
        dns_max_ttl_ms: 10_000,
        ..Config::default()
    });
    let queries = serve(&h, |q| Some(answer(q, 0, 86_400, 1)));

    assert!(h.stack.dns_resolve("example.com").is_ok());
    h.clock.advance(10_000);
    assert!(h.stack.dns_resolve("example.com").is_ok());
    assert_eq!(queries.borrow().len(), 2);
}

#[test]
fn zero_ttl_not_cached() {
    let mut h = dns_harness(Config::default());
    let queries = serve(&h, |q| Some(answer(q, 0, 0, 1)));

    assert!(h.stack.dns_resolve("example.com").is_ok());
    assert!(h.stack.dns_resolve("example.com").is_ok());
    assert_eq!(queries.borrow().len(), 2);
}

#[test]
fn no_server_configured() {
    let mut h = Harness::new();
    assert_eq!(h.stack.dns_resolve("example.com"), Err(DnsError::NoServer));
    assert!(h.sent().is_empty());
}

#[test]
fn invalid_names_rejected() {
    let mut h = dns_harness(Config::default());
    let long_label = "a".repeat(64);
    let long_name = vec!["abcdefgh"; 29].join(".");
    let (long_label, long_name) = (long_label.as_str(), long_name.as_str());
    let names = ["", ".", "a..b", ".example.com", long_label, long_name];
    for name in names.iter().copied() {
        assert_eq!(
            h.stack.dns_resolve(name),
            Err(DnsError::InvalidName),
            "{:?}",
            name
        );
    }
    assert!(h.sent().is_empty());
}

#[test]
fn unanswered_queries_time_out() {
    let mut h = dns_harness(Config {
        dns_timeout_ms: 50,
        dns_max_retries: 3,
        ..Config::default()
    });
    let queries = serve(&h, |_| None);

    assert_eq!(h.stack.dns_resolve("example.com"), Err(DnsError::Timeout));

    // The same query is sent once per attempt.
    let queries = queries.borrow();
    assert_eq!(queries.len(), 3);
    assert!(queries.iter().all(|q| q.payload == queries[0].payload));
}

#[test]
fn answers_to_other_queries_ignored() {
    let mut h = dns_harness(Config {
        dns_timeout_ms: 50,
        dns_max_retries: 1,
        ..Config::default()
    });
    serve(&h, |q| {
        let mut msg = answer(q, 0, 60, 1);
        msg[1] = msg[1].wrapping_add(1);
        Some(msg)
    });

    assert_eq!(h.stack.dns_resolve("example.com"), Err(DnsError::Timeout));
}

#[test]
fn server_errors_reported() {
    let mut h = dns_harness(Config::default());
    serve(&h, |q| Some(answer(q, 3, 0, 0)));
    assert_eq!(
        h.stack.dns_resolve("nonexistent.example"),
        Err(DnsError::ServerFailure(3))
    );
}

#[test]
fn answer_without_address() {
    let mut h = dns_harness(Config::default());
    serve(&h, |q| Some(answer(q, 0, 60, 0)));
    assert_eq!(h.stack.dns_resolve("example.com"), Err(DnsError::NoAddress));
}

#[test]
fn port_released_after_query() {
    let mut h = dns_harness(Config::default());
    let queries = serve(&h, |q| Some(answer(q, 0, 60, 1)));
    assert!(h.stack.dns_resolve("example.com").is_ok());
    let port = queries.borrow()[0].src.port();

    // A late duplicate answer is treated like any datagram for a closed port.
    let late = answer(&queries.borrow()[0].payload, 0, 60, 1);
    h.sent();
    h.inject(udp_frame(
        GATEWAY_MAC,
        SocketAddrV4::new(GATEWAY_IP, 53),
        local(port),
        &late,
    ));
    h.poll(2);
    let unreachable = h.sent_icmp();
    assert_eq!(unreachable.len(), 1);
    assert_eq!((unreachable[0].ty, unreachable[0].code), (3, 3));
}
