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

//! Internet checksum (RFC 1071).
//!
//! The checksum is the ones'-complement of the ones'-complement sum of all the 16-bit
//! big-endian words of the data. An odd trailing byte is padded with a zero on its right.
//! Verifying a checksum consists in computing it again over the data including the checksum
//! field, which must then give zero.

/// Adds the 16-bit words of `data` to `sum`, without folding.
pub fn accumulate(mut sum: u32, data: &[u8]) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum = sum.wrapping_add(u32::from(u16::from_be_bytes([word[0], word[1]])));
    }
    if let [last] = chunks.remainder() {
        sum = sum.wrapping_add(u32::from(*last) << 8);
    }
    sum
}

/// Folds the carries of `sum` and returns its complement.
pub fn finish(mut sum: u32) -> u16 {
    while (sum >> 16) != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Computes the checksum of `data`.
pub fn checksum(data: &[u8]) -> u16 {
    finish(accumulate(0, data))
}

/// Returns the unfolded sum of the TCP/UDP pseudo-header.
pub fn pseudo_header(src: u32, dst: u32, protocol: u8, len: u16) -> u32 {
    (src >> 16) + (src & 0xffff) + (dst >> 16) + (dst & 0xffff) + u32::from(protocol) + u32::from(len)
}

/// Computes the checksum of a TCP or UDP packet, including its pseudo-header.
pub fn transport(src: u32, dst: u32, protocol: u8, segment: &[u8]) -> u16 {
    let len = segment.len() as u16;
    finish(accumulate(pseudo_header(src, dst, protocol, len), segment))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc1071_example() {
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(accumulate(0, &data), 0x2_ddf0);
        assert_eq!(checksum(&data), !0xddf2);
    }

    #[test]
    fn odd_length_pads_right() {
        assert_eq!(checksum(&[0x12]), !0x1200);
        assert_eq!(checksum(&[0x12, 0x34, 0x56]), !(0x1234 + 0x5600));
    }

    #[test]
    fn inserted_checksum_verifies_to_zero() {
        let mut header = [
            0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0x00, 0x00, 0xc0, 0xa8,
            0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
        ];
        let sum = checksum(&header);
        assert_eq!(sum, 0xb861);
        header[10..12].copy_from_slice(&sum.to_be_bytes());
        assert_eq!(checksum(&header), 0);

        for byte in 0..header.len() {
            let mut corrupted = header;
            corrupted[byte] ^= 0x01;
            assert_ne!(checksum(&corrupted), 0);
        }
    }

    #[test]
    fn transport_checksum_verifies_to_zero() {
        let mut segment = [0x30, 0x39, 0x00, 0x35, 0x00, 0x0b, 0x00, 0x00, b'a', b'b', b'c'];
        let sum = transport(0xc0a8_0001, 0xc0a8_0002, 17, &segment);
        segment[6..8].copy_from_slice(&sum.to_be_bytes());
        assert_eq!(transport(0xc0a8_0001, 0xc0a8_0002, 17, &segment), 0);
        assert_ne!(transport(0xc0a8_0001, 0xc0a8_0003, 17, &segment), 0);
    }
}
