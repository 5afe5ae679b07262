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

use super::connection::Connection;
use super::{TcpError, TcpHandle, TcpState};
use crate::port_assign::PortAssign;
use crate::seq;
use rand::Rng as _;
use rand_chacha::ChaCha20Rng;
use rand_core::SeedableRng as _;

/// Fixed pool of connection records.
#[derive(Debug)]
pub(crate) struct TcpConnections {
    slots: Vec<Connection>,
    ports: PortAssign,
    /// Source of the initial sequence numbers.
    iss_counter: u32,
    rng: ChaCha20Rng,
    next_generation: u32,
    /// Next slot to poll.
    round_robin: usize,
}

impl TcpConnections {
    pub(crate) fn new(count: usize, buffer_size: usize, seed: u64) -> Self {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        TcpConnections {
            slots: (0..count).map(|_| Connection::new(buffer_size)).collect(),
            ports: PortAssign::new(rng.gen()),
            iss_counter: rng.gen(),
            rng,
            next_generation: 1,
            round_robin: 0,
        }
    }

    /// Allocates a record for local port `port`.
    ///
    /// Fails if a listener owns the port. If no slot is free, the record that has been in
    /// `TIME_WAIT` for the longest time is reclaimed. The record is returned in the
    /// [`TcpState::Closed`] state and must be moved to another state by the caller.
    pub(crate) fn new_connection(&mut self, port: u16, now: u32) -> Result<usize, TcpError> {
        if self
            .slots
            .iter()
            .any(|c| c.state == TcpState::Listen && c.local_port == port)
        {
            return Err(TcpError::PortListened(port));
        }

        let slot = match self.slots.iter().position(|c| c.state == TcpState::Closed) {
            Some(slot) => slot,
            None => self
                .slots
                .iter()
                .enumerate()
                .filter(|(_, c)| c.state == TcpState::TimeWait)
                .max_by_key(|(_, c)| seq::elapsed(c.state_since, now))
                .map(|(slot, _)| slot)
                .ok_or(TcpError::PoolFull)?,
        };

        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1);
        self.slots[slot].reset(generation, port, now);
        Ok(slot)
    }

    /// Finds the record of an incoming segment. A connection matching the 4-tuple is preferred
    /// over a listener of the port.
    pub(crate) fn find(&self, local_port: u16, remote_ip: u32, remote_port: u16) -> Option<usize> {
        self.slots
            .iter()
            .position(|c| c.matches(local_port, remote_ip, remote_port))
            .or_else(|| {
                self.slots
                    .iter()
                    .position(|c| c.state == TcpState::Listen && c.local_port == local_port)
            })
    }

    /// Picks a random ephemeral port that no record uses.
    pub(crate) fn pick_ephemeral(&mut self) -> Option<u16> {
        let slots = &self.slots;
        self.ports.pick(|port| {
            !slots
                .iter()
                .any(|c| c.state != TcpState::Closed && c.local_port == port)
        })
    }

    /// Generates an initial sequence number.
    pub(crate) fn next_iss(&mut self, now: u32) -> u32 {
        let jitter: u32 = self.rng.gen_range(0..1024);
        self.iss_counter = self
            .iss_counter
            .wrapping_add(now)
            .wrapping_add(64000)
            .wrapping_add(jitter);
        self.iss_counter
    }

    pub(crate) fn handle(&self, slot: usize) -> TcpHandle {
        TcpHandle {
            slot,
            generation: self.slots[slot].generation,
        }
    }

    /// Returns the record of a handle, or `None` if the handle is stale.
    pub(crate) fn get(&self, handle: TcpHandle) -> Option<&Connection> {
        self.slots
            .get(handle.slot)
            .filter(|c| c.generation == handle.generation && c.state != TcpState::Closed)
    }

    /// Mutable equivalent of [`TcpConnections::get`].
    pub(crate) fn get_mut(&mut self, handle: TcpHandle) -> Option<&mut Connection> {
        self.slots
            .get_mut(handle.slot)
            .filter(|c| c.generation == handle.generation && c.state != TcpState::Closed)
    }

    pub(crate) fn slot_mut(&mut self, slot: usize) -> &mut Connection {
        &mut self.slots[slot]
    }

    /// Returns the slot to poll and advances the round-robin index.
    pub(crate) fn next_to_poll(&mut self) -> Option<usize> {
        if self.slots.is_empty() {
            return None;
        }
        let slot = self.round_robin % self.slots.len();
        self.round_robin = (slot + 1) % self.slots.len();
        Some(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::TcpConnections;
    use crate::tcp::{TcpError, TcpState};

    #[test]
    fn listener_owns_port() {
        let mut pool = TcpConnections::new(3, 64, 0);
        let slot = pool.new_connection(80, 0).unwrap();
        pool.slot_mut(slot).state = TcpState::Listen;
        assert_eq!(pool.new_connection(80, 0), Err(TcpError::PortListened(80)));
        assert!(pool.new_connection(81, 0).is_ok());
    }

    #[test]
    fn time_wait_reclaimed() {
        let mut pool = TcpConnections::new(2, 64, 0);
        for (port, since) in [(1000, 50), (1001, 10)].iter() {
            let slot = pool.new_connection(*port, *since).unwrap();
            pool.slot_mut(slot).state = TcpState::TimeWait;
        }
        // Record entered in TIME_WAIT at t=10 is the oldest.
        let slot = pool.new_connection(2000, 100).unwrap();
        assert_eq!(pool.slot_mut(slot).local_port, 2000);
        assert_eq!(slot, 1);

        pool.slot_mut(slot).state = TcpState::Established;
        pool.slot_mut(0).state = TcpState::Established;
        assert_eq!(pool.new_connection(3000, 100), Err(TcpError::PoolFull));
    }

    #[test]
    fn exact_match_preferred() {
        let mut pool = TcpConnections::new(2, 64, 0);
        let listener = pool.new_connection(80, 0).unwrap();
        pool.slot_mut(listener).state = TcpState::Listen;

        pool.slot_mut(listener).state = TcpState::Established;
        let conn = listener;
        pool.slot_mut(conn).remote_ip = 7;
        pool.slot_mut(conn).remote_port = 5000;
        let listener = pool.new_connection(80, 0).unwrap();
        pool.slot_mut(listener).state = TcpState::Listen;

        assert_eq!(pool.find(80, 7, 5000), Some(conn));
        assert_eq!(pool.find(80, 7, 5001), Some(listener));
        assert_eq!(pool.find(81, 7, 5000), None);
    }

    #[test]
    fn stale_handles() {
        let mut pool = TcpConnections::new(1, 64, 0);
        let slot = pool.new_connection(80, 0).unwrap();
        pool.slot_mut(slot).state = TcpState::Listen;
        let old = pool.handle(slot);
        assert!(pool.get(old).is_some());

        pool.slot_mut(slot).free();
        assert!(pool.get(old).is_none());

        let slot = pool.new_connection(80, 0).unwrap();
        pool.slot_mut(slot).state = TcpState::Listen;
        assert!(pool.get(old).is_none());
        assert!(pool.get(pool.handle(slot)).is_some());
    }

    #[test]
    fn ephemeral_ports_avoid_used() {
        let mut pool = TcpConnections::new(1, 64, 9);
        let port = pool.pick_ephemeral().unwrap();
        assert!(port >= 49152);
        let slot = pool.new_connection(port, 0).unwrap();
        pool.slot_mut(slot).state = TcpState::SynSent;
        for _ in 0..50 {
            assert_ne!(pool.pick_ephemeral(), Some(port));
        }
    }
}
