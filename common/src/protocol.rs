// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// DNS size bounds, transport selection, and TCP framing.
//
// DNSCrypt over TCP uses the DNS-over-TCP framing: 2-byte big-endian length
// prefix + payload (RFC 1035 Section 4.2.2).

use std::fmt;
use std::str::FromStr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Smallest well-formed DNS message: 12-byte header + 5-byte root question.
pub const MIN_DNS_PACKET_SIZE: usize = 12 + 5;
/// Largest DNS message accepted inside a DNSCrypt frame.
pub const MAX_DNS_PACKET_SIZE: usize = 4096;
/// Largest padded question sent over UDP.
pub const MAX_DNS_UDP_PACKET_SIZE: usize = 4096;

/// Maximum TCP-framed payload.
pub const MAX_PAYLOAD: usize = 65535;

/// Transport used towards the resolver; selects the padding strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Udp => f.write_str("udp"),
            Self::Tcp => f.write_str("tcp"),
        }
    }
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "udp" => Ok(Self::Udp),
            "tcp" => Ok(Self::Tcp),
            other => Err(format!("unknown transport: {other} (expected udp or tcp)")),
        }
    }
}

/// Whether the DNS header has the TC (truncated) bit set.
pub fn has_tc_flag(packet: &[u8]) -> bool {
    packet.len() > 2 && packet[2] & 0x02 != 0
}

/// Read a length-prefixed message from a stream.
///
/// Format: `[2 bytes: big-endian length] [N bytes: payload]`
pub async fn read_framed<R: AsyncRead + Unpin>(stream: &mut R) -> std::io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 2];
    stream.read_exact(&mut len_buf).await?;
    let len = u16::from_be_bytes(len_buf) as usize;

    if len == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "zero-length message",
        ));
    }

    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Write a length-prefixed message to a stream.
pub async fn write_framed<W: AsyncWrite + Unpin>(
    stream: &mut W,
    data: &[u8],
) -> std::io::Result<()> {
    if data.is_empty() || data.len() > MAX_PAYLOAD {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("payload size out of range: {} (1..={})", data.len(), MAX_PAYLOAD),
        ));
    }

    let len = (data.len() as u16).to_be_bytes();
    stream.write_all(&len).await?;
    stream.write_all(data).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn framed_roundtrip() {
        let data = b"dnscrypt frame";
        let mut buf = Vec::new();
        write_framed(&mut buf, data).await.unwrap();
        assert_eq!(&buf[..2], &[0, data.len() as u8]);

        let mut cursor = std::io::Cursor::new(buf);
        let result = read_framed(&mut cursor).await.unwrap();
        assert_eq!(result, data);
    }

    #[tokio::test]
    async fn rejects_zero_length() {
        let wire = [0u8, 0]; // length = 0
        let mut cursor = std::io::Cursor::new(wire.to_vec());
        assert!(read_framed(&mut cursor).await.is_err());
    }

    #[tokio::test]
    async fn rejects_truncated_payload() {
        let wire = [0u8, 10, 1, 2, 3];
        let mut cursor = std::io::Cursor::new(wire.to_vec());
        assert!(read_framed(&mut cursor).await.is_err());
    }

    #[tokio::test]
    async fn write_rejects_oversize() {
        let mut buf = Vec::new();
        let data = vec![0u8; MAX_PAYLOAD + 1];
        assert!(write_framed(&mut buf, &data).await.is_err());
        assert!(buf.is_empty());
    }

    #[test]
    fn transport_parses_case_insensitively() {
        assert_eq!("UDP".parse::<Transport>().unwrap(), Transport::Udp);
        assert_eq!(" tcp ".parse::<Transport>().unwrap(), Transport::Tcp);
        assert!("quic".parse::<Transport>().is_err());
        assert_eq!(Transport::Tcp.to_string(), "tcp");
    }

    #[test]
    fn tc_flag_detection() {
        let mut header = [0u8; 12];
        assert!(!has_tc_flag(&header));
        header[2] = 0x82;
        assert!(has_tc_flag(&header));
        assert!(!has_tc_flag(&[0, 0]));
    }
}
