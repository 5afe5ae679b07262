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

//! Link device over a [TAP](https://en.wikipedia.org/wiki/TAP_(network_driver)) interface,
//! and clock over the system's monotonic clock.

use coopnet_stack::{Clock, Frame, LinkDevice};
use std::{io, os::unix::io::AsRawFd as _, time::Instant};

/// TAP interface in non-blocking mode.
pub struct TapDevice {
    iface: tun_tap::Iface,
}

impl TapDevice {
    /// Opens or creates the TAP interface named `name`.
    ///
    /// > **Note**: It is extremely common for this method to fail because of lack of
    /// >           privilege.
    pub fn new(name: &str) -> Result<Self, io::Error> {
        let iface = tun_tap::Iface::without_packet_info(name, tun_tap::Mode::Tap)?;

        let mut nonblock: libc::c_int = 1;
        let result = unsafe { libc::ioctl(iface.as_raw_fd(), libc::FIONBIO, &mut nonblock) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(TapDevice { iface })
    }

    /// Returns the name given to the interface by the kernel.
    pub fn name(&self) -> &str {
        self.iface.name()
    }
}

impl LinkDevice for TapDevice {
    fn init(&mut self) -> bool {
        // The interface is already open. Whether it is up is decided by the host's
        // configuration.
        true
    }

    fn receive(&mut self, frame: &mut Frame) -> bool {
        match self.iface.recv(frame.buffer_mut()) {
            Ok(0) => false,
            Ok(n) => {
                frame.set_len(n);
                log::trace!("rx: {} bytes", n);
                true
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => false,
            Err(err) => {
                log::warn!("Error while reading from {}: {}", self.iface.name(), err);
                false
            }
        }
    }

    fn send(&mut self, frame: &Frame) {
        log::trace!("tx: {} bytes", frame.len());
        if let Err(err) = self.iface.send(frame.as_bytes()) {
            // Frames are dropped like on a congested wire.
            log::warn!("Error while writing to {}: {}", self.iface.name(), err);
        }
    }
}

/// Milliseconds elapsed since the clock was created.
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        SystemClock::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u32 {
        // Truncation makes the counter wrap around, which the stack expects.
        self.start.elapsed().as_millis() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::SystemClock;
    use coopnet_stack::Clock;

    #[test]
    fn clock_starts_near_zero_and_advances() {
        let clock = SystemClock::default();
        let first = clock.now_ms();
        assert!(first < 1000);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(clock.now_ms() >= first + 5);
    }
}
