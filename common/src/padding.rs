// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// ISO/IEC 7816-4 style padding for DNSCrypt payloads.
//
//   [packet] [0x80] [0x00 ... 0x00]
//
// The delimiter is always present, so an unpadded packet can end in zeros.

/// Padding delimiter byte.
pub const DELIMITER: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PaddingError {
    #[error("invalid padding (short packet)")]
    ShortPacket,

    #[error("invalid padding (delimiter not found)")]
    DelimiterNotFound,
}

/// Pad `packet` to exactly `min_size` bytes.
///
/// If `min_size` leaves no room for the delimiter, the result is one byte
/// longer than `packet` and therefore longer than `min_size`.
pub fn pad(packet: &[u8], min_size: usize) -> Vec<u8> {
    let mut padded = Vec::with_capacity(min_size.max(packet.len() + 1));
    padded.extend_from_slice(packet);
    padded.push(DELIMITER);
    if padded.len() < min_size {
        padded.resize(min_size, 0);
    }
    padded
}

/// Strip padding added by [`pad`], returning the original packet.
pub fn unpad(packet: &[u8]) -> Result<&[u8], PaddingError> {
    for (i, &byte) in packet.iter().enumerate().rev() {
        match byte {
            0x00 => continue,
            DELIMITER => return Ok(&packet[..i]),
            _ => return Err(PaddingError::DelimiterNotFound),
        }
    }
    Err(PaddingError::ShortPacket)
}
