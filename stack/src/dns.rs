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

//! DNS stub resolver (RFC 1035), for A records only.
//!
//! Resolution itself is driven by [`NetStack::dns_resolve`](crate::NetStack::dns_resolve),
//! which blocks by running the main loop until an answer arrives. This module contains the
//! message format, the answer cache, and the state of the outstanding query.

use crate::seq;
use std::net::Ipv4Addr;

/// UDP port of DNS servers.
pub const SERVER_PORT: u16 = 53;

/// Maximum length of a name, dots included.
const MAX_NAME_LEN: usize = 253;
/// Maximum length of a label.
const MAX_LABEL_LEN: usize = 63;

const HEADER_LEN: usize = 12;
const FLAG_RESPONSE: u16 = 0x8000;
const FLAG_RECURSION_DESIRED: u16 = 0x0100;
const TYPE_A: u16 = 1;
const CLASS_IN: u16 = 1;

/// Maximum number of compression pointers followed while skipping a name.
const MAX_JUMPS: usize = 10;
/// Maximum number of labels read while skipping a name.
const MAX_LABELS: usize = 128;

/// Error that can happen while resolving a name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DnsError {
    /// No DNS server is configured.
    #[error("No DNS server configured")]
    NoServer,
    /// The name isn't a valid domain name.
    #[error("Invalid domain name")]
    InvalidName,
    /// The server didn't answer.
    #[error("DNS query timed out")]
    Timeout,
    /// The server answered with an error code.
    #[error("DNS server failure (rcode {0})")]
    ServerFailure(u8),
    /// The answer doesn't contain any IPv4 address.
    #[error("No A record in answer")]
    NoAddress,
    /// The answer couldn't be parsed.
    #[error("Malformed DNS answer")]
    Malformed,
    /// No UDP port available for the query.
    #[error("No UDP port available")]
    NoPort,
}

/// Validates `name` and returns it without its trailing dot, if any.
pub(crate) fn validate_name(name: &str) -> Result<&str, DnsError> {
    let name = name.strip_suffix('.').unwrap_or(name);
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(DnsError::InvalidName);
    }
    if name
        .split('.')
        .any(|label| label.is_empty() || label.len() > MAX_LABEL_LEN)
    {
        return Err(DnsError::InvalidName);
    }
    Ok(name)
}

/// Builds a query for the A record of `name`, which must have been validated.
pub(crate) fn build_query(id: u16, name: &str) -> Vec<u8> {
    let mut msg = Vec::with_capacity(HEADER_LEN + name.len() + 6);
    msg.extend_from_slice(&id.to_be_bytes());
    msg.extend_from_slice(&FLAG_RECURSION_DESIRED.to_be_bytes());
    // One question, no answer, authority or additional records.
    msg.extend_from_slice(&[0, 1, 0, 0, 0, 0, 0, 0]);
    for label in name.split('.') {
        msg.push(label.len() as u8);
        msg.extend_from_slice(label.as_bytes());
    }
    msg.push(0);
    msg.extend_from_slice(&TYPE_A.to_be_bytes());
    msg.extend_from_slice(&CLASS_IN.to_be_bytes());
    msg
}

fn read_u16(msg: &[u8], offset: usize) -> Option<u16> {
    let b = msg.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([b[0], b[1]]))
}

/// Returns the offset right after the name starting at `offset`.
fn skip_name(msg: &[u8], mut offset: usize) -> Option<usize> {
    // Offset after the name as it appears at its original position, set at the first jump.
    let mut end = None;
    let mut jumps = 0;

    for _ in 0..MAX_LABELS {
        let len = *msg.get(offset)?;
        match len & 0xc0 {
            0x00 if len == 0 => return Some(end.unwrap_or(offset + 1)),
            0x00 => offset += 1 + usize::from(len),
            0xc0 => {
                let target = usize::from(read_u16(msg, offset)? & 0x3fff);
                if end.is_none() {
                    end = Some(offset + 2);
                }
                jumps += 1;
                if jumps > MAX_JUMPS {
                    return None;
                }
                offset = target;
            }
            _ => return None,
        }
    }

    None
}

/// Parses the response to the query `id`.
///
/// Returns `None` if the message isn't a response to that query. Otherwise returns the first
/// IPv4 address of the answer section along with its time-to-live in seconds.
pub(crate) fn parse_response(msg: &[u8], id: u16) -> Option<Result<(Ipv4Addr, u32), DnsError>> {
    if read_u16(msg, 0)? != id || read_u16(msg, 2)? & FLAG_RESPONSE == 0 {
        return None;
    }
    Some(parse_answer(msg))
}

fn parse_answer(msg: &[u8]) -> Result<(Ipv4Addr, u32), DnsError> {
    let flags = read_u16(msg, 2).ok_or(DnsError::Malformed)?;
    let rcode = (flags & 0xf) as u8;
    if rcode != 0 {
        return Err(DnsError::ServerFailure(rcode));
    }

    let questions = read_u16(msg, 4).ok_or(DnsError::Malformed)?;
    let answers = read_u16(msg, 6).ok_or(DnsError::Malformed)?;

    let mut offset = HEADER_LEN;
    for _ in 0..questions {
        offset = skip_name(msg, offset).ok_or(DnsError::Malformed)? + 4;
    }

    for _ in 0..answers {
        offset = skip_name(msg, offset).ok_or(DnsError::Malformed)?;
        let fixed = msg
            .get(offset..offset + 10)
            .ok_or(DnsError::Malformed)?;
        let ty = u16::from_be_bytes([fixed[0], fixed[1]]);
        let class = u16::from_be_bytes([fixed[2], fixed[3]]);
        let ttl = u32::from_be_bytes([fixed[4], fixed[5], fixed[6], fixed[7]]);
        let rdlength = usize::from(u16::from_be_bytes([fixed[8], fixed[9]]));
        offset += 10;

        let rdata = msg
            .get(offset..offset + rdlength)
            .ok_or(DnsError::Malformed)?;
        if ty == TYPE_A && class == CLASS_IN && rdlength == 4 {
            let addr = Ipv4Addr::new(rdata[0], rdata[1], rdata[2], rdata[3]);
            return Ok((addr, ttl));
        }
        offset += rdlength;
    }

    Err(DnsError::NoAddress)
}

#[derive(Debug)]
struct CacheEntry {
    /// Lowercase, without trailing dot.
    name: String,
    addr: Ipv4Addr,
    expires: u32,
}

/// Query waiting for an answer.
#[derive(Debug)]
struct Pending {
    id: u16,
    port: u16,
    answer: Option<Result<(Ipv4Addr, u32), DnsError>>,
}

#[derive(Debug)]
pub(crate) struct DnsResolver {
    cache: Vec<CacheEntry>,
    capacity: usize,
    /// Identifier of the next query. Never zero.
    next_id: u16,
    pending: Option<Pending>,
}

impl DnsResolver {
    pub(crate) fn new(capacity: usize, first_id: u16) -> Self {
        DnsResolver {
            cache: Vec::with_capacity(capacity),
            capacity,
            next_id: first_id.max(1),
            pending: None,
        }
    }

    /// Looks up a name, already validated, in the cache. Expired entries are removed.
    pub(crate) fn cached(&mut self, name: &str, now: u32) -> Option<Ipv4Addr> {
        self.cache.retain(|e| seq::before(now, e.expires));
        self.cache
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
            .map(|e| e.addr)
    }

    /// Stores an answer. The entry whose expiry is the closest is evicted if the cache is full.
    pub(crate) fn insert(&mut self, name: &str, addr: Ipv4Addr, ttl_ms: u32, now: u32) {
        if self.capacity == 0 || ttl_ms == 0 {
            return;
        }
        let expires = now.wrapping_add(ttl_ms);

        if let Some(entry) = self
            .cache
            .iter_mut()
            .find(|e| e.name.eq_ignore_ascii_case(name))
        {
            entry.addr = addr;
            entry.expires = expires;
            return;
        }

        let entry = CacheEntry {
            name: name.to_ascii_lowercase(),
            addr,
            expires,
        };
        if self.cache.len() < self.capacity {
            self.cache.push(entry);
        } else if let Some(victim) = self
            .cache
            .iter_mut()
            .min_by_key(|e| seq::elapsed(now, e.expires))
        {
            *victim = entry;
        }
    }

    /// Registers a new outstanding query on `port` and returns its identifier.
    pub(crate) fn begin(&mut self, port: u16) -> u16 {
        let id = self.next_id;
        self.next_id = match self.next_id.wrapping_add(1) {
            0 => 1,
            n => n,
        };
        self.pending = Some(Pending {
            id,
            port,
            answer: None,
        });
        id
    }

    /// Forgets the outstanding query and returns its port.
    pub(crate) fn end(&mut self) -> Option<u16> {
        self.pending.take().map(|p| p.port)
    }

    /// Returns the local port of the outstanding query.
    pub(crate) fn pending_port(&self) -> Option<u16> {
        self.pending.as_ref().map(|p| p.port)
    }

    /// Processes a datagram received on the port of the outstanding query.
    pub(crate) fn receive(&mut self, msg: &[u8]) {
        if let Some(pending) = &mut self.pending {
            if pending.answer.is_some() {
                return;
            }
            match parse_response(msg, pending.id) {
                Some(answer) => pending.answer = Some(answer),
                None => log::trace!("Ignoring DNS message for another query"),
            }
        }
    }

    /// Returns the answer to the outstanding query, if received.
    pub(crate) fn take_answer(&mut self) -> Option<Result<(Ipv4Addr, u32), DnsError>> {
        self.pending.as_mut().and_then(|p| p.answer.take())
    }
}

#[cfg(test)]
mod tests {
    use super::{build_query, parse_response, skip_name, validate_name, DnsError, DnsResolver};
    use std::net::Ipv4Addr;

    fn response(id: u16, rcode: u8, answers: &[&[u8]]) -> Vec<u8> {
        let mut msg = build_query(id, "example.com");
        msg[2] = 0x81;
        msg[3] = 0x80 | rcode;
        msg[7] = answers.len() as u8;
        for answer in answers {
            msg.extend_from_slice(answer);
        }
        msg
    }

    // Pointer to the question name, type, class, TTL and data length.
    const CNAME: &[u8] = &[
        0xc0, 12, 0, 5, 0, 1, 0, 0, 0, 60, 0, 4, 3, b'w', b'w', 0xc0,
    ];
    const A: &[u8] = &[0xc0, 12, 0, 1, 0, 1, 0, 0, 0x0e, 0x10, 0, 4, 93, 184, 216, 34];

    #[test]
    fn query_layout() {
        let query = build_query(0x1234, "a.bc");
        assert_eq!(
            query,
            vec![
                0x12, 0x34, 0x01, 0x00, 0, 1, 0, 0, 0, 0, 0, 0, 1, b'a', 2, b'b', b'c', 0, 0, 1,
                0, 1
            ]
        );
    }

    #[test]
    fn first_a_record() {
        let msg = response(7, 0, &[CNAME, A]);
        assert_eq!(
            parse_response(&msg, 7),
            Some(Ok((Ipv4Addr::new(93, 184, 216, 34), 3600)))
        );
        assert_eq!(parse_response(&msg, 8), None);
    }

    #[test]
    fn errors() {
        let msg = response(7, 3, &[]);
        assert_eq!(parse_response(&msg, 7), Some(Err(DnsError::ServerFailure(3))));

        let msg = response(7, 0, &[CNAME]);
        assert_eq!(parse_response(&msg, 7), Some(Err(DnsError::NoAddress)));

        let mut msg = response(7, 0, &[A]);
        msg.truncate(msg.len() - 2);
        assert_eq!(parse_response(&msg, 7), Some(Err(DnsError::Malformed)));

        // Queries aren't responses.
        assert_eq!(parse_response(&build_query(7, "a.b"), 7), None);
    }

    #[test]
    fn pointer_loop_bounded() {
        let mut msg = vec![0; 12];
        msg.extend_from_slice(&[0xc0, 12]);
        assert_eq!(skip_name(&msg, 12), None);

        let mut msg = vec![0; 12];
        msg.extend_from_slice(&[1, b'a', 0xc0, 16, 0]);
        assert_eq!(skip_name(&msg, 12), Some(16));
    }

    #[test]
    fn name_validation() {
        assert_eq!(validate_name("example.com."), Ok("example.com"));
        assert_eq!(validate_name(""), Err(DnsError::InvalidName));
        assert_eq!(validate_name("."), Err(DnsError::InvalidName));
        assert_eq!(validate_name("a..b"), Err(DnsError::InvalidName));
        assert!(validate_name(&"a".repeat(63)).is_ok());
        assert_eq!(validate_name(&"a".repeat(64)), Err(DnsError::InvalidName));
        let long = vec!["abc"; 64].join(".");
        assert_eq!(validate_name(&long), Err(DnsError::InvalidName));
    }

    #[test]
    fn cache_expiry_and_eviction() {
        let mut dns = DnsResolver::new(2, 1);
        dns.insert("A.example", Ipv4Addr::new(1, 1, 1, 1), 1000, 0);
        dns.insert("b.example", Ipv4Addr::new(2, 2, 2, 2), 5000, 0);
        assert_eq!(dns.cached("a.EXAMPLE", 500), Some(Ipv4Addr::new(1, 1, 1, 1)));

        // Evicts the entry expiring first.
        dns.insert("c.example", Ipv4Addr::new(3, 3, 3, 3), 9000, 500);
        assert_eq!(dns.cached("a.example", 500), None);
        assert_eq!(dns.cached("b.example", 500), Some(Ipv4Addr::new(2, 2, 2, 2)));

        assert_eq!(dns.cached("b.example", 5000), None);
        assert_eq!(dns.cached("c.example", 5000), Some(Ipv4Addr::new(3, 3, 3, 3)));
    }

    #[test]
    fn ids_skip_zero() {
        let mut dns = DnsResolver::new(0, 0xffff);
        assert_eq!(dns.begin(1000), 0xffff);
        assert_eq!(dns.end(), Some(1000));
        assert_eq!(dns.begin(1001), 1);
        assert_eq!(dns.pending_port(), Some(1001));
    }
}
