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

use core::fmt;
use hashbrown::HashSet;
use rand::distributions::{Distribution as _, Uniform};
use rand_chacha::ChaCha20Rng;
use rand_core::SeedableRng as _;

/// First port of the ephemeral range (RFC 6335).
pub const EPHEMERAL_MIN: u16 = 49152;

/// Number of random ports tried before giving up.
const MAX_ATTEMPTS: usize = 100;

/// Port assignment system. Keeps track of which port is used.
///
/// This struct doesn't know and doesn't care whether it is used by TCP, UDP, or something else.
/// It is expected that one instance of this struct exists for each protocol.
pub struct PortAssign {
    occupied: HashSet<u16, fnv::FnvBuildHasher>,
    rng: ChaCha20Rng,
    ephemeral: Uniform<u16>,
}

/// Error returned by [`PortAssign::reserve`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Port {0} is already reserved")]
pub struct PortTaken(pub u16);

impl PortAssign {
    /// Builds a new [`PortAssign`] with no port assigned. The seed determines the sequence of
    /// ephemeral ports that are handed out.
    pub fn new(seed: u64) -> PortAssign {
        PortAssign {
            occupied: Default::default(),
            rng: ChaCha20Rng::seed_from_u64(seed),
            ephemeral: Uniform::new_inclusive(EPHEMERAL_MIN, u16::max_value()),
        }
    }

    /// Try to reserve a specific port. Returns an error if the port was already reserved.
    pub fn reserve(&mut self, port: u16) -> Result<(), PortTaken> {
        if self.occupied.insert(port) {
            Ok(())
        } else {
            Err(PortTaken(port))
        }
    }

    /// Reserves a random port of the ephemeral range. Returns `None` if no free port was found
    /// after a bounded number of attempts.
    pub fn reserve_any(&mut self) -> Option<u16> {
        let occupied = &self.occupied;
        let port = Self::draw(&mut self.rng, &self.ephemeral, |p| !occupied.contains(&p))?;
        self.occupied.insert(port);
        Some(port)
    }

    /// Picks a random port of the ephemeral range for which `is_free` returns true, without
    /// reserving it. Returns `None` if none was found after a bounded number of attempts.
    pub fn pick(&mut self, is_free: impl FnMut(u16) -> bool) -> Option<u16> {
        Self::draw(&mut self.rng, &self.ephemeral, is_free)
    }

    /// Un-reserves a port. Returns false if the port wasn't reserved.
    pub fn free(&mut self, port: u16) -> bool {
        self.occupied.remove(&port)
    }

    /// Returns true if the port is reserved.
    pub fn is_reserved(&self, port: u16) -> bool {
        self.occupied.contains(&port)
    }

    fn draw(
        rng: &mut ChaCha20Rng,
        distribution: &Uniform<u16>,
        mut is_free: impl FnMut(u16) -> bool,
    ) -> Option<u16> {
        (0..MAX_ATTEMPTS)
            .map(|_| distribution.sample(&mut *rng))
            .find(|port| is_free(*port))
    }
}

impl fmt::Debug for PortAssign {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("PortAssign").field(&self.occupied).finish()
    }
}
