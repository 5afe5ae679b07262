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

//! Processing of received segments, following the "segment arrives" event of RFC 793.

use super::connection::{Connection, DEFAULT_MSS};
use super::output::{send_ack, send_reset, send_reset_for, send_reset_seq, send_segment};
use super::pool::TcpConnections;
use super::segment::{self, Segment, FLAG_ACK, FLAG_FIN, FLAG_RST, FLAG_SYN, HEADER_LEN};
use super::TcpState;
use crate::frame::Frame;
use crate::interface::Interface;
use crate::ip::{Datagram, MAX_IP_PAYLOAD};
use crate::link::LinkDevice;
use crate::seq;
use std::net::Ipv4Addr;

/// Processes a received TCP segment.
pub(crate) fn process<L: LinkDevice>(
    iface: &mut Interface<L>,
    connections: &mut TcpConnections,
    frame: &Frame,
    datagram: &Datagram,
    now: u32,
) {
    let segment = match segment::parse(frame, datagram) {
        Some(s) => s,
        None => return,
    };

    let slot = match connections.find(segment.dst_port, datagram.src, segment.src_port) {
        Some(slot) => slot,
        None => {
            send_reset(iface, datagram, &segment);
            return;
        }
    };

    match connections.slot_mut(slot).state {
        TcpState::Closed => {}
        TcpState::Listen => {
            let iss = connections.next_iss(now);
            let conn = connections.slot_mut(slot);
            listen(iface, conn, datagram, &segment, iss, now);
        }
        TcpState::SynSent => {
            let conn = connections.slot_mut(slot);
            syn_sent(iface, conn, &segment, now);
        }
        _ => {
            let conn = connections.slot_mut(slot);
            synchronized(iface, conn, frame, &segment, now);
        }
    }
}

/// Effective MSS given the option sent by the peer.
fn negotiated_mss(config_mss: u16, peer: Option<u16>) -> u16 {
    let max = (MAX_IP_PAYLOAD - HEADER_LEN) as u16;
    peer.unwrap_or(DEFAULT_MSS)
        .min(config_mss)
        .min(max)
        .max(1)
}

fn listen<L: LinkDevice>(
    iface: &mut Interface<L>,
    conn: &mut Connection,
    datagram: &Datagram,
    segment: &Segment,
    iss: u32,
    now: u32,
) {
    if segment.has(FLAG_RST) {
        return;
    }
    if segment.has(FLAG_ACK) {
        send_reset(iface, datagram, segment);
        return;
    }
    if !segment.has(FLAG_SYN) {
        return;
    }

    conn.remote_ip = datagram.src;
    conn.remote_port = segment.src_port;
    conn.irs = segment.seq;
    conn.rcv_next = segment.seq.wrapping_add(1);
    conn.set_iss(iss);
    conn.snd_window = u32::from(segment.window);
    conn.snd_wl1 = segment.seq;
    conn.snd_wl2 = iss;
    conn.mss = negotiated_mss(iface.config.tcp_mss, segment.mss);
    conn.last_remote_activity = now;
    conn.timer = now;
    conn.set_state(TcpState::SynReceived, now);

    log::debug!(
        "TCP {}: connection request from {}:{}",
        conn.local_port,
        Ipv4Addr::from(conn.remote_ip),
        conn.remote_port
    );
    send_segment(iface, conn, now);
}

fn syn_sent<L: LinkDevice>(
    iface: &mut Interface<L>,
    conn: &mut Connection,
    segment: &Segment,
    now: u32,
) {
    let ack_acceptable = segment.has(FLAG_ACK)
        && seq::after(segment.ack, conn.iss)
        && seq::before_or_eq(segment.ack, conn.snd_max);

    if segment.has(FLAG_ACK) && !ack_acceptable {
        if !segment.has(FLAG_RST) {
            send_reset_seq(
                iface,
                conn.local_port,
                conn.remote_ip,
                conn.remote_port,
                segment.ack,
            );
        }
        return;
    }

    if segment.has(FLAG_RST) {
        if ack_acceptable {
            log::debug!(
                "TCP {}: connection refused by {}:{}",
                conn.local_port,
                Ipv4Addr::from(conn.remote_ip),
                conn.remote_port
            );
            conn.free();
        }
        return;
    }

    if !segment.has(FLAG_SYN) {
        return;
    }

    conn.last_remote_activity = now;
    conn.irs = segment.seq;
    conn.rcv_next = segment.seq.wrapping_add(1);
    conn.mss = negotiated_mss(iface.config.tcp_mss, segment.mss);
    conn.snd_window = u32::from(segment.window);
    conn.snd_wl1 = segment.seq;
    conn.snd_wl2 = segment.ack;

    if ack_acceptable {
        conn.snd_unack = segment.ack;
        conn.retransmissions = 0;
        conn.set_state(TcpState::Established, now);
        send_ack(iface, conn);
        // Data queued before the connection was established.
        send_segment(iface, conn, now);
    } else {
        // Simultaneous open.
        conn.snd_next = conn.iss;
        conn.set_state(TcpState::SynReceived, now);
        send_segment(iface, conn, now);
    }
}

/// Acceptability test of RFC 793.
fn acceptable(conn: &Connection, segment: &Segment) -> bool {
    let window = conn.rx.free() as u32;
    let len = segment.seq_len();
    let start = segment.seq;
    let window_end = conn.rcv_next.wrapping_add(window);

    match (len, window) {
        (0, 0) => start == conn.rcv_next,
        (0, _) => seq::in_range(conn.rcv_next, start, window_end),
        (_, 0) => false,
        _ => {
            let last = start.wrapping_add(len - 1);
            seq::in_range(conn.rcv_next, start, window_end)
                || seq::in_range(conn.rcv_next, last, window_end)
        }
    }
}

fn synchronized<L: LinkDevice>(
    iface: &mut Interface<L>,
    conn: &mut Connection,
    frame: &Frame,
    segment: &Segment,
    now: u32,
) {
    // Retransmitted FIN: our acknowledgement of it was lost.
    if conn.state == TcpState::TimeWait
        && segment.has(FLAG_FIN)
        && !segment.has(FLAG_RST)
        && segment
            .seq
            .wrapping_add(segment.payload_len as u32)
            .wrapping_add(1)
            == conn.rcv_next
    {
        conn.state_since = now;
        send_ack(iface, conn);
        return;
    }

    if !acceptable(conn, segment) {
        if !segment.has(FLAG_RST) {
            send_ack(iface, conn);
        }
        return;
    }

    conn.last_remote_activity = now;

    if segment.has(FLAG_RST) {
        if conn.state == TcpState::SynReceived && conn.passive {
            conn.relisten(now);
        } else {
            log::debug!(
                "TCP {} <-> {}:{}: reset by peer",
                conn.local_port,
                Ipv4Addr::from(conn.remote_ip),
                conn.remote_port
            );
            conn.free();
        }
        return;
    }

    if segment.has(FLAG_SYN) {
        log::debug!("TCP {}: SYN in window, aborting", conn.local_port);
        send_reset_for(iface, conn);
        conn.free();
        return;
    }

    if !segment.has(FLAG_ACK) {
        return;
    }

    if conn.state == TcpState::SynReceived {
        if !(seq::after(segment.ack, conn.iss) && seq::before_or_eq(segment.ack, conn.snd_max)) {
            send_reset_seq(
                iface,
                conn.local_port,
                conn.remote_ip,
                conn.remote_port,
                segment.ack,
            );
            return;
        }
        conn.snd_wl1 = segment.seq;
        conn.snd_wl2 = segment.ack;
        conn.snd_window = u32::from(segment.window);
        let next = if conn.fin_queued {
            TcpState::FinWait1
        } else {
            TcpState::Established
        };
        conn.set_state(next, now);
    }

    if !process_ack(iface, conn, segment, now) {
        return;
    }

    let mut need_ack = false;

    if segment.payload_len != 0 && conn.state.can_receive() {
        if seq::after(segment.seq, conn.rcv_next) {
            // Out of order. Not kept, the peer will retransmit.
            send_ack(iface, conn);
            return;
        }

        let skip = conn.rcv_next.wrapping_sub(segment.seq) as usize;
        if skip < segment.payload_len {
            let payload = &segment.payload(frame)[skip..];
            let written = conn.rx.write(payload);
            conn.rcv_next = conn.rcv_next.wrapping_add(written as u32);
        }
        need_ack = true;
    }

    if segment.has(FLAG_FIN)
        && segment.seq.wrapping_add(segment.payload_len as u32) == conn.rcv_next
    {
        conn.rcv_next = conn.rcv_next.wrapping_add(1);
        conn.rx.close();
        need_ack = true;

        match conn.state {
            TcpState::SynReceived | TcpState::Established => {
                conn.set_state(TcpState::CloseWait, now)
            }
            TcpState::FinWait1 => {
                if conn.fin_acked() {
                    conn.set_state(TcpState::TimeWait, now);
                } else {
                    conn.set_state(TcpState::Closing, now);
                }
            }
            TcpState::FinWait2 => conn.set_state(TcpState::TimeWait, now),
            _ => {}
        }
    }

    if need_ack {
        send_ack(iface, conn);
    }
}

/// Processes the acknowledgement field. Returns false if processing of the segment must stop.
fn process_ack<L: LinkDevice>(
    iface: &mut Interface<L>,
    conn: &mut Connection,
    segment: &Segment,
    now: u32,
) -> bool {
    let ack = segment.ack;

    if seq::after(ack, conn.snd_max) {
        // Acknowledges something never sent.
        send_ack(iface, conn);
        return false;
    }

    if seq::after(ack, conn.snd_unack) {
        let mut acked = ack.wrapping_sub(conn.snd_unack);
        if !conn.syn_acked() {
            acked -= 1;
        }
        if let Some(fin) = conn.fin_seq {
            if seq::after(ack, fin) && !conn.fin_acked() {
                acked -= 1;
            }
        }
        conn.tx.ack(acked as usize);
        conn.snd_unack = ack;
        if seq::before(conn.snd_next, ack) {
            conn.snd_next = ack;
        }
        conn.retransmissions = 0;
        conn.timer = now;
    }

    if seq::before(conn.snd_wl1, segment.seq)
        || (conn.snd_wl1 == segment.seq && seq::before_or_eq(conn.snd_wl2, ack))
    {
        conn.snd_window = u32::from(segment.window);
        conn.snd_wl1 = segment.seq;
        conn.snd_wl2 = ack;
    }

    if conn.fin_acked() {
        match conn.state {
            TcpState::FinWait1 => conn.set_state(TcpState::FinWait2, now),
            TcpState::Closing => conn.set_state(TcpState::TimeWait, now),
            TcpState::LastAck => {
                log::debug!("TCP {}: connection closed", conn.local_port);
                conn.free();
                return false;
            }
            _ => {}
        }
    }

    // Acknowledgements may have opened the peer's window.
    send_segment(iface, conn, now);
    true
}

#[cfg(test)]
mod tests {
    use super::{acceptable, negotiated_mss};
    use crate::tcp::connection::Connection;
    use crate::tcp::segment::{Segment, FLAG_ACK, FLAG_FIN};

    fn segment(seq: u32, payload_len: usize, flags: u8) -> Segment {
        Segment {
            src_port: 1,
            dst_port: 2,
            seq,
            ack: 0,
            flags,
            window: 0,
            mss: None,
            payload_offset: 0,
            payload_len,
        }
    }

    #[test]
    fn acceptability() {
        let mut conn = Connection::new(100);
        conn.reset(1, 2, 0);
        conn.rcv_next = 0xffff_fff0;

        assert!(acceptable(&conn, &segment(0xffff_fff0, 0, FLAG_ACK)));
        assert!(acceptable(&conn, &segment(0x0000_0010, 0, FLAG_ACK)));
        assert!(!acceptable(&conn, &segment(0x0000_0060, 0, FLAG_ACK)));
        assert!(!acceptable(&conn, &segment(0xffff_ffe0, 0, FLAG_ACK)));
        // Retransmission overlapping the expected sequence number.
        assert!(acceptable(&conn, &segment(0xffff_ffe0, 20, FLAG_ACK)));
        assert!(!acceptable(&conn, &segment(0xffff_ffe0, 16, FLAG_ACK)));
        // A FIN right after old data occupies one sequence number.
        assert!(acceptable(&conn, &segment(0xffff_ffe0, 16, FLAG_FIN)));

        conn.rx.write(&[0; 100]);
        assert!(acceptable(&conn, &segment(0xffff_fff0, 0, FLAG_ACK)));
        assert!(!acceptable(&conn, &segment(0xffff_fff0, 1, FLAG_ACK)));
    }

    #[test]
    fn mss_negotiation() {
        assert_eq!(negotiated_mss(1460, None), 536);
        assert_eq!(negotiated_mss(1460, Some(9000)), 1460);
        assert_eq!(negotiated_mss(4000, Some(9000)), 1460);
        assert_eq!(negotiated_mss(1460, Some(1200)), 1200);
        assert_eq!(negotiated_mss(1460, Some(0)), 1);
    }
}
