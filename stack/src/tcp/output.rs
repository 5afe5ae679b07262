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

//! Building and sending segments, and the timers of a connection.

use super::connection::Connection;
use super::segment::{
    Segment, FLAG_ACK, FLAG_FIN, FLAG_PSH, FLAG_RST, FLAG_SYN, HEADER_LEN, OPTION_MSS,
};
use super::TcpState;
use crate::checksum;
use crate::interface::Interface;
use crate::ip::{self, Datagram, IP_PAYLOAD_OFFSET, PROTO_TCP};
use crate::link::LinkDevice;
use crate::seq;
use std::net::Ipv4Addr;

/// Header of a segment to send.
struct Header {
    src_port: u16,
    dst: u32,
    dst_port: u16,
    seq: u32,
    ack: u32,
    flags: u8,
    window: u16,
    mss: Option<u16>,
}

/// What the next segment of a connection carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Plan {
    syn: bool,
    len: usize,
    fin: bool,
}

impl Plan {
    fn has_work(&self) -> bool {
        self.syn || self.len != 0 || self.fin
    }
}

/// Determines the content of the next segment of `conn`.
///
/// A SYN is sent only if it isn't in flight, which is also the case after a rewind. Same for
/// the FIN, which is only sent along with the last byte of the send buffer.
fn plan(conn: &Connection) -> Plan {
    let syn = matches!(conn.state, TcpState::SynSent | TcpState::SynReceived)
        && conn.snd_next == conn.iss;

    let data_state = conn.syn_acked()
        && matches!(
            conn.state,
            TcpState::Established
                | TcpState::CloseWait
                | TcpState::FinWait1
                | TcpState::Closing
                | TcpState::LastAck
        );

    let mut len = 0;
    if data_state && conn.tx.unsent() != 0 {
        len = conn
            .tx
            .unsent()
            .min(usize::from(conn.mss))
            .min(conn.usable_window() as usize);
        // Zero window probe.
        if len == 0 && conn.snd_window == 0 && !conn.in_flight() {
            len = 1;
        }
    }

    let fin = data_state
        && conn.fin_queued
        && len == conn.tx.unsent()
        && conn
            .fin_seq
            .map_or(true, |fin| fin == conn.snd_next.wrapping_add(len as u32));

    Plan { syn, len, fin }
}

/// Sends the next segment of `conn` if there is anything to send. Returns true if a segment
/// went out.
pub(crate) fn send_segment<L: LinkDevice>(
    iface: &mut Interface<L>,
    conn: &mut Connection,
    now: u32,
) -> bool {
    let plan = plan(conn);
    if !plan.has_work() {
        return false;
    }

    let mut flags = 0;
    if plan.syn {
        flags |= FLAG_SYN;
    }
    // The initial SYN of an active open is the only segment without ACK.
    if conn.state != TcpState::SynSent {
        flags |= FLAG_ACK;
    }
    if plan.len != 0 {
        flags |= FLAG_PSH;
    }
    if plan.fin {
        flags |= FLAG_FIN;
    }

    let header = Header {
        src_port: conn.local_port,
        dst: conn.remote_ip,
        dst_port: conn.remote_port,
        seq: conn.snd_next,
        ack: if flags & FLAG_ACK != 0 { conn.rcv_next } else { 0 },
        flags,
        window: conn.advertised_window(),
        mss: if plan.syn {
            Some(iface.config.tcp_mss)
        } else {
            None
        },
    };

    let tx = &conn.tx;
    if !emit(iface, &header, plan.len, |buf| {
        tx.peek_unsent(buf);
    }) {
        return false;
    }

    let was_idle = !conn.in_flight();
    let seq_len = plan.len as u32 + u32::from(plan.syn) + u32::from(plan.fin);
    conn.tx.mark_sent(plan.len);
    if plan.fin {
        conn.fin_seq = Some(conn.snd_next.wrapping_add(plan.len as u32));
    }
    conn.snd_next = conn.snd_next.wrapping_add(seq_len);
    if seq::after(conn.snd_next, conn.snd_max) {
        conn.snd_max = conn.snd_next;
    }
    if was_idle {
        conn.timer = now;
    }
    true
}

/// Sends a segment without data acknowledging everything received so far.
pub(crate) fn send_ack<L: LinkDevice>(iface: &mut Interface<L>, conn: &mut Connection) -> bool {
    let header = Header {
        src_port: conn.local_port,
        dst: conn.remote_ip,
        dst_port: conn.remote_port,
        seq: conn.snd_next,
        ack: conn.rcv_next,
        flags: FLAG_ACK,
        window: conn.advertised_window(),
        mss: None,
    };
    emit(iface, &header, 0, |_| {})
}

/// Sends a reset to the peer of `conn`.
pub(crate) fn send_reset_for<L: LinkDevice>(iface: &mut Interface<L>, conn: &Connection) {
    send_reset_seq(
        iface,
        conn.local_port,
        conn.remote_ip,
        conn.remote_port,
        conn.snd_next,
    );
}

/// Sends a reset with the given sequence number and no acknowledgement.
pub(crate) fn send_reset_seq<L: LinkDevice>(
    iface: &mut Interface<L>,
    local_port: u16,
    remote_ip: u32,
    remote_port: u16,
    seq: u32,
) {
    let header = Header {
        src_port: local_port,
        dst: remote_ip,
        dst_port: remote_port,
        seq,
        ack: 0,
        flags: FLAG_RST,
        window: 0,
        mss: None,
    };
    emit(iface, &header, 0, |_| {});
}

/// Answers a segment that doesn't belong to any connection (RFC 793, section 3.4).
pub(crate) fn send_reset<L: LinkDevice>(
    iface: &mut Interface<L>,
    datagram: &Datagram,
    segment: &Segment,
) {
    if segment.has(FLAG_RST)
        || datagram.dst == ip::LIMITED_BROADCAST
        || datagram.dst == u32::from(iface.config.subnet_broadcast())
    {
        return;
    }

    let (seq, ack, flags) = if segment.has(FLAG_ACK) {
        (segment.ack, 0, FLAG_RST)
    } else {
        (
            0,
            segment.seq.wrapping_add(segment.seq_len()),
            FLAG_RST | FLAG_ACK,
        )
    };

    log::trace!(
        "TCP reset to {}:{}",
        Ipv4Addr::from(datagram.src),
        segment.src_port
    );

    let header = Header {
        src_port: segment.dst_port,
        dst: datagram.src,
        dst_port: segment.src_port,
        seq,
        ack,
        flags,
        window: 0,
        mss: None,
    };
    emit(iface, &header, 0, |_| {});
}

/// Builds a segment, fills its payload with `fill`, and sends it.
fn emit<L: LinkDevice>(
    iface: &mut Interface<L>,
    header: &Header,
    payload_len: usize,
    fill: impl FnOnce(&mut [u8]),
) -> bool {
    let mut frame = match iface.frames.alloc() {
        Some(f) => f,
        None => {
            log::trace!("No frame available for TCP segment");
            return false;
        }
    };

    let offset = IP_PAYLOAD_OFFSET;
    let header_len = if header.mss.is_some() {
        HEADER_LEN + 4
    } else {
        HEADER_LEN
    };
    let segment_len = header_len + payload_len;

    frame.write_u16(offset, header.src_port);
    frame.write_u16(offset + 2, header.dst_port);
    frame.write_u32(offset + 4, header.seq);
    frame.write_u32(offset + 8, header.ack);
    frame.write_u8(offset + 12, ((header_len / 4) as u8) << 4);
    frame.write_u8(offset + 13, header.flags);
    frame.write_u16(offset + 14, header.window);
    frame.write_u16(offset + 16, 0);
    frame.write_u16(offset + 18, 0);
    if let Some(mss) = header.mss {
        frame.write_u8(offset + HEADER_LEN, OPTION_MSS);
        frame.write_u8(offset + HEADER_LEN + 1, 4);
        frame.write_u16(offset + HEADER_LEN + 2, mss);
    }
    fill(&mut frame.buffer_mut()[offset + header_len..offset + segment_len]);

    let sum = checksum::transport(
        iface.local_ip(),
        header.dst,
        PROTO_TCP,
        &frame.buffer()[offset..offset + segment_len],
    );
    frame.write_u16(offset + 16, sum);

    let sent = iface.ip_send(&mut frame, header.dst, PROTO_TCP, segment_len);
    iface.frames.free(frame);
    sent
}

/// Advances the timers of a connection and sends whatever is pending.
pub(crate) fn poll<L: LinkDevice>(iface: &mut Interface<L>, conn: &mut Connection, now: u32) {
    let rto = iface.config.tcp_retransmit_timeout_ms;
    let max_retransmits = iface.config.tcp_max_retransmits;
    let give_up = iface.config.tcp_give_up_ms;

    match conn.state {
        TcpState::Closed | TcpState::Listen => return,
        TcpState::TimeWait => {
            if seq::elapsed(conn.state_since, now) >= iface.config.tcp_time_wait_ms {
                conn.free();
            }
            return;
        }
        TcpState::SynSent | TcpState::SynReceived | TcpState::LastAck
            if seq::elapsed(conn.state_since, now) >= give_up =>
        {
            log::debug!(
                "TCP {} <-> {}:{}: giving up in {:?}",
                conn.local_port,
                Ipv4Addr::from(conn.remote_ip),
                conn.remote_port,
                conn.state
            );
            conn.free();
            return;
        }
        _ => {}
    }

    // Window update once enough space has been freed by the application.
    if conn.window_closed && conn.rx.free() >= conn.reopen_threshold() {
        conn.window_closed = false;
        send_ack(iface, conn);
    }

    if conn.in_flight() {
        let timeout = if conn.state == TcpState::SynSent {
            rto.saturating_mul(3)
        } else {
            rto
        };

        if seq::elapsed(conn.timer, now) >= timeout {
            let probing = conn.snd_window == 0 && conn.syn_acked();
            if (!probing && conn.retransmissions >= max_retransmits)
                || seq::elapsed(conn.last_remote_activity, now) >= give_up
            {
                log::debug!(
                    "TCP {} <-> {}:{}: aborted after {} retransmissions",
                    conn.local_port,
                    Ipv4Addr::from(conn.remote_ip),
                    conn.remote_port,
                    conn.retransmissions
                );
                conn.free();
                return;
            }

            if !probing {
                conn.retransmissions += 1;
            }
            log::trace!(
                "TCP {}: retransmitting from {}",
                conn.local_port,
                conn.snd_unack
            );
            conn.snd_next = conn.snd_unack;
            conn.tx.rewind();
            send_segment(iface, conn, now);
            return;
        }
    }

    send_segment(iface, conn, now);
}

#[cfg(test)]
mod tests {
    use super::{plan, Plan};
    use crate::tcp::connection::Connection;
    use crate::tcp::TcpState;

    fn established() -> Connection {
        let mut conn = Connection::new(4096);
        conn.reset(1, 1000, 0);
        conn.set_iss(100);
        conn.snd_unack = 101;
        conn.snd_next = 101;
        conn.snd_max = 101;
        conn.snd_window = 1000;
        conn.mss = 500;
        conn.state = TcpState::Established;
        conn
    }

    #[test]
    fn segments_bounded_by_mss_and_window() {
        let mut conn = established();
        conn.tx.write(&[0; 2000]);
        assert_eq!(plan(&conn), Plan { syn: false, len: 500, fin: false });

        conn.tx.mark_sent(500);
        conn.snd_next = 601;
        conn.tx.mark_sent(400);
        conn.snd_next = 1001;
        assert_eq!(plan(&conn).len, 100);

        conn.snd_next = 1101;
        conn.tx.mark_sent(100);
        assert!(!plan(&conn).has_work());
    }

    #[test]
    fn zero_window_probe_only_when_idle() {
        let mut conn = established();
        conn.snd_window = 0;
        conn.tx.write(b"abc");
        assert_eq!(plan(&conn).len, 1);

        conn.tx.mark_sent(1);
        conn.snd_next = 102;
        assert!(!plan(&conn).has_work());
    }

    #[test]
    fn fin_after_last_byte() {
        let mut conn = established();
        conn.state = TcpState::FinWait1;
        conn.fin_queued = true;
        conn.tx.write(b"bye");
        assert_eq!(plan(&conn), Plan { syn: false, len: 3, fin: true });

        conn.mss = 2;
        assert_eq!(plan(&conn), Plan { syn: false, len: 2, fin: false });

        // Already sent, not in flight anymore after a rewind.
        conn.mss = 500;
        conn.fin_seq = Some(104);
        assert!(plan(&conn).fin);
        conn.tx.mark_sent(3);
        conn.snd_next = 105;
        assert!(!plan(&conn).has_work());
    }

    #[test]
    fn syn_not_resent_while_in_flight() {
        let mut conn = Connection::new(4096);
        conn.reset(1, 1000, 0);
        conn.set_iss(100);
        conn.state = TcpState::SynSent;
        assert_eq!(plan(&conn), Plan { syn: true, len: 0, fin: false });
        conn.tx.write(b"early");
        assert_eq!(plan(&conn).len, 0);
        conn.snd_next = 101;
        assert!(!plan(&conn).has_work());
    }
}
