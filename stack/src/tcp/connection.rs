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

use super::buffer::{RecvBuffer, SendBuffer};
use super::TcpState;
use crate::seq;
use std::net::Ipv4Addr;

/// MSS assumed when the peer doesn't announce one (RFC 1122).
pub(crate) const DEFAULT_MSS: u16 = 536;

/// Record of a TCP connection.
///
/// A record in the [`TcpState::Closed`] state is a free slot of the pool.
#[derive(Debug)]
pub(crate) struct Connection {
    pub(crate) state: TcpState,
    /// Incremented every time the slot is reused. Used to detect stale handles.
    pub(crate) generation: u32,

    pub(crate) local_port: u16,
    pub(crate) remote_ip: u32,
    pub(crate) remote_port: u16,
    /// True if the record was opened with a listen. Such a record goes back to `LISTEN` if the
    /// handshake is reset.
    pub(crate) passive: bool,

    /// Initial send sequence number.
    pub(crate) iss: u32,
    /// Initial receive sequence number.
    pub(crate) irs: u32,
    /// Oldest unacknowledged sequence number.
    pub(crate) snd_unack: u32,
    /// Next sequence number to send.
    pub(crate) snd_next: u32,
    /// Highest sequence number ever sent, plus one. Differs from `snd_next` after a rewind.
    pub(crate) snd_max: u32,
    /// Next sequence number expected from the peer.
    pub(crate) rcv_next: u32,

    /// Window advertised by the peer.
    pub(crate) snd_window: u32,
    /// Sequence and acknowledgement numbers of the segment that last updated `snd_window`.
    pub(crate) snd_wl1: u32,
    pub(crate) snd_wl2: u32,
    /// True while we advertise a zero window to avoid the silly window syndrome.
    pub(crate) window_closed: bool,
    /// Largest segment the peer accepts.
    pub(crate) mss: u16,

    /// True once the application has closed its side. A FIN is sent once the send buffer
    /// is drained.
    pub(crate) fin_queued: bool,
    /// Sequence number of our FIN, once it has been sent.
    pub(crate) fin_seq: Option<u32>,

    /// Time when the oldest unacknowledged segment was sent.
    pub(crate) timer: u32,
    /// Time when the current state was entered.
    pub(crate) state_since: u32,
    pub(crate) retransmissions: u32,
    /// Time when a segment was last received from the peer.
    pub(crate) last_remote_activity: u32,

    pub(crate) rx: RecvBuffer,
    pub(crate) tx: SendBuffer,
}

impl Connection {
    pub(crate) fn new(buffer_size: usize) -> Self {
        Connection {
            state: TcpState::Closed,
            generation: 0,
            local_port: 0,
            remote_ip: 0,
            remote_port: 0,
            passive: false,
            iss: 0,
            irs: 0,
            snd_unack: 0,
            snd_next: 0,
            snd_max: 0,
            rcv_next: 0,
            snd_window: 0,
            snd_wl1: 0,
            snd_wl2: 0,
            window_closed: false,
            mss: DEFAULT_MSS,
            fin_queued: false,
            fin_seq: None,
            timer: 0,
            state_since: 0,
            retransmissions: 0,
            last_remote_activity: 0,
            rx: RecvBuffer::new(buffer_size),
            tx: SendBuffer::new(buffer_size),
        }
    }

    /// Clears every field for a new use of the slot.
    pub(crate) fn reset(&mut self, generation: u32, local_port: u16, now: u32) {
        self.state = TcpState::Closed;
        self.generation = generation;
        self.local_port = local_port;
        self.remote_ip = 0;
        self.remote_port = 0;
        self.passive = false;
        self.iss = 0;
        self.irs = 0;
        self.snd_unack = 0;
        self.snd_next = 0;
        self.snd_max = 0;
        self.rcv_next = 0;
        self.snd_window = 0;
        self.snd_wl1 = 0;
        self.snd_wl2 = 0;
        self.window_closed = false;
        self.mss = DEFAULT_MSS;
        self.fin_queued = false;
        self.fin_seq = None;
        self.timer = now;
        self.state_since = now;
        self.retransmissions = 0;
        self.last_remote_activity = now;
        self.rx.reset();
        self.tx.reset();
    }

    /// Initialises the send sequence space.
    pub(crate) fn set_iss(&mut self, iss: u32) {
        self.iss = iss;
        self.snd_unack = iss;
        self.snd_next = iss;
        self.snd_max = iss;
    }

    pub(crate) fn set_state(&mut self, state: TcpState, now: u32) {
        if self.state != state {
            log::trace!(
                "TCP {} <-> {}:{}: {:?} -> {:?}",
                self.local_port,
                Ipv4Addr::from(self.remote_ip),
                self.remote_port,
                self.state,
                state
            );
            self.state = state;
            self.state_since = now;
        }
    }

    /// Frees the slot. Unread data is lost.
    pub(crate) fn free(&mut self) {
        self.state = TcpState::Closed;
        self.rx.close();
    }

    /// Returns to the `LISTEN` state after a failed passive handshake.
    pub(crate) fn relisten(&mut self, now: u32) {
        let generation = self.generation;
        let port = self.local_port;
        self.reset(generation, port, now);
        self.passive = true;
        self.state = TcpState::Listen;
    }

    /// True if our SYN has been acknowledged.
    pub(crate) fn syn_acked(&self) -> bool {
        seq::after(self.snd_unack, self.iss)
    }

    /// True if our FIN has been acknowledged.
    pub(crate) fn fin_acked(&self) -> bool {
        self.fin_seq
            .map_or(false, |fin| seq::after(self.snd_unack, fin))
    }

    /// True if segments are currently in flight.
    pub(crate) fn in_flight(&self) -> bool {
        self.snd_next != self.snd_unack
    }

    /// Returns true if the 4-tuple identifies this connection.
    pub(crate) fn matches(&self, local_port: u16, remote_ip: u32, remote_port: u16) -> bool {
        self.state != TcpState::Closed
            && self.state != TcpState::Listen
            && self.local_port == local_port
            && self.remote_ip == remote_ip
            && self.remote_port == remote_port
    }

    /// Returns the window to advertise, and closes it when the free space is too small to be
    /// worth announcing.
    pub(crate) fn advertised_window(&mut self) -> u16 {
        if self.window_closed {
            return 0;
        }
        let free = self.rx.free();
        if free < self.reopen_threshold() {
            self.window_closed = true;
            return 0;
        }
        free.min(usize::from(u16::max_value())) as u16
    }

    /// Free receive space above which a closed window is opened again.
    pub(crate) fn reopen_threshold(&self) -> usize {
        usize::from(self.mss).min(self.rx.capacity() / 2)
    }

    /// Number of bytes the peer's window allows to send beyond `snd_next`.
    pub(crate) fn usable_window(&self) -> u32 {
        let used = self.snd_next.wrapping_sub(self.snd_unack);
        self.snd_window.saturating_sub(used)
    }
}
