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

//! Circular stream buffers.

/// Buffer of received bytes waiting to be read by the application.
#[derive(Debug)]
pub(crate) struct RecvBuffer {
    data: Box<[u8]>,
    /// Position of the next byte to read.
    start: usize,
    len: usize,
    /// Set when the peer has closed its side. No more bytes will be written.
    closed: bool,
}

impl RecvBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        RecvBuffer {
            data: vec![0; capacity].into_boxed_slice(),
            start: 0,
            len: 0,
            closed: false,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.start = 0;
        self.len = 0;
        self.closed = false;
    }

    pub(crate) fn capacity(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Number of bytes that can be written.
    pub(crate) fn free(&self) -> usize {
        self.data.len() - self.len
    }

    pub(crate) fn close(&mut self) {
        self.closed = true;
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    /// Appends as many bytes of `bytes` as fit. Returns the number of bytes written.
    pub(crate) fn write(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.free());
        let capacity = self.data.len();
        for (i, byte) in bytes[..n].iter().enumerate() {
            self.data[(self.start + self.len + i) % capacity] = *byte;
        }
        self.len += n;
        n
    }

    /// Moves bytes into `out`. Returns the number of bytes read.
    pub(crate) fn read(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.len);
        let capacity = self.data.len();
        for (i, byte) in out[..n].iter_mut().enumerate() {
            *byte = self.data[(self.start + i) % capacity];
        }
        self.start = (self.start + n) % capacity.max(1);
        self.len -= n;
        n
    }
}

/// Buffer of bytes queued by the application.
///
/// The buffer is split in two consecutive regions: bytes sent but not acknowledged yet, which
/// are retained for retransmission, followed by bytes not sent yet.
#[derive(Debug)]
pub(crate) struct SendBuffer {
    data: Box<[u8]>,
    /// Position of the oldest unacknowledged byte.
    start: usize,
    in_flight: usize,
    unsent: usize,
}

impl SendBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        SendBuffer {
            data: vec![0; capacity].into_boxed_slice(),
            start: 0,
            in_flight: 0,
            unsent: 0,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.start = 0;
        self.in_flight = 0;
        self.unsent = 0;
    }

    /// Number of bytes that can be queued.
    pub(crate) fn free(&self) -> usize {
        self.data.len() - self.in_flight - self.unsent
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub(crate) fn unsent(&self) -> usize {
        self.unsent
    }

    /// Queues as many bytes of `bytes` as fit. Returns the number of bytes queued.
    pub(crate) fn write(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.free());
        let capacity = self.data.len();
        let end = self.start + self.in_flight + self.unsent;
        for (i, byte) in bytes[..n].iter().enumerate() {
            self.data[(end + i) % capacity] = *byte;
        }
        self.unsent += n;
        n
    }

    /// Copies the first unsent bytes into `out`, without marking them as sent. Returns the
    /// number of bytes copied.
    pub(crate) fn peek_unsent(&self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.unsent);
        let capacity = self.data.len();
        let first = self.start + self.in_flight;
        for (i, byte) in out[..n].iter_mut().enumerate() {
            *byte = self.data[(first + i) % capacity];
        }
        n
    }

    /// Moves `n` bytes from the unsent region to the in-flight region.
    pub(crate) fn mark_sent(&mut self, n: usize) {
        let n = n.min(self.unsent);
        self.unsent -= n;
        self.in_flight += n;
    }

    /// Releases the first `n` bytes, which the peer has acknowledged.
    ///
    /// After a [`rewind`](SendBuffer::rewind), acknowledged bytes can be part of the unsent
    /// region.
    pub(crate) fn ack(&mut self, n: usize) {
        let n = n.min(self.in_flight + self.unsent);
        let from_flight = n.min(self.in_flight);
        self.in_flight -= from_flight;
        self.unsent -= n - from_flight;
        self.start = (self.start + n) % self.data.len().max(1);
    }

    /// Marks every in-flight byte as unsent, so that they get transmitted again.
    pub(crate) fn rewind(&mut self) {
        self.unsent += self.in_flight;
        self.in_flight = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::{RecvBuffer, SendBuffer};

    #[test]
    fn recv_wraps_around() {
        let mut buf = RecvBuffer::new(8);
        assert_eq!(buf.write(b"abcdef"), 6);
        let mut out = [0; 4];
        assert_eq!(buf.read(&mut out), 4);
        assert_eq!(&out, b"abcd");
        assert_eq!(buf.write(b"ghijklmn"), 6);
        assert_eq!(buf.free(), 0);
        let mut out = [0; 16];
        assert_eq!(buf.read(&mut out), 8);
        assert_eq!(&out[..8], b"efghijkl");
    }

    #[test]
    fn send_regions() {
        let mut buf = SendBuffer::new(8);
        assert_eq!(buf.write(b"hello world"), 8);
        assert_eq!(buf.free(), 0);

        let mut out = [0; 5];
        assert_eq!(buf.peek_unsent(&mut out), 5);
        assert_eq!(&out, b"hello");
        buf.mark_sent(5);
        assert_eq!((buf.in_flight(), buf.unsent()), (5, 3));

        buf.ack(2);
        assert_eq!(buf.free(), 2);
        assert_eq!(buf.write(b"XY"), 2);

        buf.rewind();
        let mut out = [0; 8];
        assert_eq!(buf.peek_unsent(&mut out), 8);
        assert_eq!(&out, b"llo woXY");
    }

    #[test]
    fn ack_after_rewind() {
        let mut buf = SendBuffer::new(16);
        buf.write(b"0123456789");
        buf.mark_sent(6);
        buf.rewind();
        buf.mark_sent(2);
        // Peer acknowledges bytes that were sent before the rewind.
        buf.ack(6);
        assert_eq!((buf.in_flight(), buf.unsent()), (0, 4));
        let mut out = [0; 4];
        buf.peek_unsent(&mut out);
        assert_eq!(&out, b"6789");
    }
}
